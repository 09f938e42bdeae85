use tracing::debug;

use crate::error::Result;
use crate::value::Heap;

/// Callback run once the whole top-level graph has been decoded.
pub type Validation = Box<dyn FnOnce(&mut Heap) -> Result<()>>;

/// Pending validations, highest priority first. Equal priorities run in
/// registration order.
#[derive(Default)]
pub(crate) struct ValidationList {
    entries: Vec<(i32, Validation)>,
}

impl ValidationList {
    pub fn register(&mut self, priority: i32, callback: Validation) {
        let at = self
            .entries
            .iter()
            .position(|(p, _)| *p < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, (priority, callback));
    }

    /// Runs and drops every callback. The first failure drops the rest.
    pub fn run(&mut self, heap: &mut Heap) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let entries = std::mem::take(&mut self.entries);
        debug!(count = entries.len(), "running validations");
        for (_, callback) in entries {
            callback(heap)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
