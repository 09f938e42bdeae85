//! Handle table with transitive fault propagation.
//!
//! Every record decoded from a stream is assigned a [`Handle`] in read order.
//! A handle starts out *unknown*, becomes *resolved* when [`HandleTable::finish`]
//! closes it, or *faulted* when a per-record [`Fault`] is attached to it.
//!
//! Faults travel along dependency edges eagerly: marking a handle faulted
//! immediately faults every handle registered as depending on it, and a
//! dependency registered on an already-faulted target faults the dependent on
//! the spot. Lookups never walk the graph.
//!
//! `assign` and `finish` calls nest in LIFO order. `finish` therefore only has
//! to settle the span between the finished handle and the lowest unknown
//! handle that something still depends on.

use std::fmt;
use std::sync::Arc;

use crate::constants::BASE_WIRE_HANDLE;
use crate::error::Fault;

/// Identity of one decoded record. Numbered from 1; [`Handle::NULL`] means "no record".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u32);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub const fn new(n: u32) -> Self {
        Handle(n)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The value a back-reference to this handle carries on the wire.
    pub fn to_wire(self) -> i32 {
        BASE_WIRE_HANDLE + self.0 as i32 - 1
    }

    /// Decodes a wire handle. Returns `None` for values below the wire base.
    pub fn from_wire(wire: i32) -> Option<Self> {
        let offset = wire.checked_sub(BASE_WIRE_HANDLE)?;
        u32::try_from(offset).ok().map(|n| Handle(n + 1))
    }

    fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolution state of a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleStatus {
    Unknown,
    Resolved,
    Faulted(Arc<Fault>),
}

struct Entry<T> {
    value: T,
    status: HandleStatus,
    deps: Vec<Handle>,
}

/// Table of decoded records indexed by handle.
pub struct HandleTable<T> {
    entries: Vec<Entry<T>>,
    /// Lowest unknown handle that has pending dependents.
    low_dep: Option<Handle>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            low_dep: None,
        }
    }

    /// Number of handles assigned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` when `handle` has been assigned and is not the null handle.
    pub fn contains(&self, handle: Handle) -> bool {
        self.entry(handle).is_some()
    }

    fn entry(&self, handle: Handle) -> Option<&Entry<T>> {
        self.entries.get(handle.index()?)
    }

    fn entry_mut(&mut self, handle: Handle) -> Option<&mut Entry<T>> {
        let idx = handle.index()?;
        self.entries.get_mut(idx)
    }

    /// Opens a new handle in the unknown state.
    pub fn assign(&mut self, value: T) -> Handle {
        self.entries.push(Entry {
            value,
            status: HandleStatus::Unknown,
            deps: Vec::new(),
        });
        Handle(self.entries.len() as u32)
    }

    /// Records that `dependent` is only valid if `target` is.
    pub fn mark_dependency(&mut self, dependent: Handle, target: Handle) {
        if dependent.is_null() || target.is_null() || dependent == target {
            return;
        }
        match self.entry(dependent).map(|e| &e.status) {
            Some(HandleStatus::Unknown) => {}
            _ => return,
        }
        let target_status = match self.entry(target) {
            Some(entry) => entry.status.clone(),
            None => return,
        };
        match target_status {
            HandleStatus::Resolved => {}
            HandleStatus::Faulted(fault) => self.mark_fault(dependent, fault),
            HandleStatus::Unknown => {
                if let Some(entry) = self.entry_mut(target) {
                    entry.deps.push(dependent);
                }
                match self.low_dep {
                    Some(low) if low <= target => {}
                    _ => self.low_dep = Some(target),
                }
            }
        }
    }

    /// Faults `handle` and everything that depends on it.
    ///
    /// Only unknown handles can fault; a handle that is already faulted keeps
    /// its first fault and a resolved handle is left alone.
    pub fn mark_fault(&mut self, handle: Handle, fault: Arc<Fault>) {
        let mut pending = vec![handle];
        while let Some(h) = pending.pop() {
            let Some(entry) = self.entry_mut(h) else {
                continue;
            };
            if entry.status != HandleStatus::Unknown {
                continue;
            }
            entry.status = HandleStatus::Faulted(fault.clone());
            pending.append(&mut entry.deps);
        }
    }

    /// Closes `handle`, resolving every handle that can no longer fault.
    pub fn finish(&mut self, handle: Handle) {
        let Some(start) = handle.index() else {
            return;
        };
        let end = match self.low_dep {
            None => start + 1,
            Some(low) if low >= handle => {
                self.low_dep = None;
                self.entries.len()
            }
            // An older unknown handle is still depended on.
            Some(_) => return,
        };
        for entry in self.entries.iter_mut().take(end).skip(start) {
            if entry.status == HandleStatus::Unknown {
                entry.status = HandleStatus::Resolved;
                entry.deps = Vec::new();
            }
        }
    }

    /// Rebinds the value of a handle unless it is faulted.
    pub fn set_object(&mut self, handle: Handle, value: T) {
        if let Some(entry) = self.entry_mut(handle) {
            if !matches!(entry.status, HandleStatus::Faulted(_)) {
                entry.value = value;
            }
        }
    }

    /// The value bound to `handle`, or `None` for the null handle, an
    /// unassigned handle or a faulted one.
    pub fn lookup(&self, handle: Handle) -> Option<&T> {
        match self.entry(handle) {
            Some(entry) if !matches!(entry.status, HandleStatus::Faulted(_)) => Some(&entry.value),
            _ => None,
        }
    }

    /// The value bound to `handle` regardless of its status.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.entry(handle).map(|e| &e.value)
    }

    /// The fault attached to `handle`, if any.
    pub fn lookup_fault(&self, handle: Handle) -> Option<&Arc<Fault>> {
        match self.entry(handle).map(|e| &e.status) {
            Some(HandleStatus::Faulted(fault)) => Some(fault),
            _ => None,
        }
    }

    pub fn status(&self, handle: Handle) -> Option<&HandleStatus> {
        self.entry(handle).map(|e| &e.status)
    }

    /// Drops every handle. The next assigned handle is 1 again.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.low_dep = None;
    }
}
