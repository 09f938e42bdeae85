//! Decoder configuration.

use regex::RegexSet;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Default nesting bound. Each level costs several decoder stack frames, so
/// this stays well inside a 2 MiB thread stack even in debug builds.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Limits and type filtering applied while decoding.
///
/// Every field has a default, so a partial TOML or JSON document is enough:
///
/// ```
/// use objstream::DecoderOptions;
///
/// let opts: DecoderOptions = serde_json::from_str(r#"{"max_depth": 32}"#).unwrap();
/// assert_eq!(opts.max_depth, 32);
/// assert_eq!(opts.max_array_length, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderOptions {
    /// Maximum record nesting depth. Raising it far past
    /// [`DEFAULT_MAX_DEPTH`] needs a correspondingly larger stack.
    pub max_depth: usize,
    /// Maximum element count of a single array.
    pub max_array_length: Option<usize>,
    /// Maximum number of handles one session may assign.
    pub max_references: Option<usize>,
    /// Maximum number of bytes consumed from the source.
    pub max_stream_bytes: Option<u64>,
    /// Type-name patterns that may be decoded. Empty allows everything.
    ///
    /// A pattern is a dotted name where `*` matches one name segment and
    /// `**` matches one or more segments, so `com.acme.*` covers
    /// `com.acme.Widget` and `com.acme.**` also covers
    /// `com.acme.inner.Widget`. A lone `*` matches every name.
    pub allow_types: Vec<String>,
    /// Type-name patterns that are always rejected. Same syntax as
    /// `allow_types`.
    pub deny_types: Vec<String>,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_array_length: None,
            max_references: None,
            max_stream_bytes: None,
            allow_types: Vec::new(),
            deny_types: Vec::new(),
        }
    }
}

impl DecoderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_array_length(mut self, len: usize) -> Self {
        self.max_array_length = Some(len);
        self
    }

    pub fn with_max_references(mut self, count: usize) -> Self {
        self.max_references = Some(count);
        self
    }

    pub fn with_max_stream_bytes(mut self, bytes: u64) -> Self {
        self.max_stream_bytes = Some(bytes);
        self
    }

    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allow_types.push(pattern.into());
        self
    }

    pub fn deny(mut self, pattern: impl Into<String>) -> Self {
        self.deny_types.push(pattern.into());
        self
    }

    /// Compiles the allow and deny lists.
    pub fn type_filter(&self) -> Result<TypeFilter, StreamError> {
        TypeFilter::new(&self.allow_types, &self.deny_types)
    }

    /// Checks a type name against the allow and deny lists.
    ///
    /// Compiles the patterns on every call; a decoder compiles them once.
    pub fn check_type(&self, name: &str) -> Result<(), StreamError> {
        self.type_filter()?.check(name)
    }

    pub(crate) fn check_array_length(&self, len: usize) -> Result<(), StreamError> {
        match self.max_array_length {
            Some(max) if len > max => Err(StreamError::FilterRejected(format!(
                "array of length {len} (limit {max})"
            ))),
            _ => Ok(()),
        }
    }

    pub(crate) fn check_references(&self, count: usize) -> Result<(), StreamError> {
        match self.max_references {
            Some(max) if count > max => Err(StreamError::FilterRejected(format!(
                "{count} references (limit {max})"
            ))),
            _ => Ok(()),
        }
    }

    pub(crate) fn check_stream_bytes(&self, consumed: u64) -> Result<(), StreamError> {
        match self.max_stream_bytes {
            Some(max) if consumed > max => Err(StreamError::FilterRejected(format!(
                "{consumed} stream bytes (limit {max})"
            ))),
            _ => Ok(()),
        }
    }
}

/// Compiled allow and deny patterns.
#[derive(Debug, Clone)]
pub struct TypeFilter {
    allow: Option<RegexSet>,
    deny: Option<RegexSet>,
}

impl TypeFilter {
    pub fn new<S: AsRef<str>>(allow: &[S], deny: &[S]) -> Result<Self, StreamError> {
        Ok(Self {
            allow: compile(allow)?,
            deny: compile(deny)?,
        })
    }

    /// Array signatures are checked by their innermost reference component;
    /// primitive arrays always pass.
    pub fn check(&self, name: &str) -> Result<(), StreamError> {
        let Some(name) = filtered_name(name) else {
            return Ok(());
        };
        if self.deny.as_ref().is_some_and(|set| set.is_match(name)) {
            return Err(StreamError::FilterRejected(name.to_owned()));
        }
        if self.allow.as_ref().is_some_and(|set| !set.is_match(name)) {
            return Err(StreamError::FilterRejected(name.to_owned()));
        }
        Ok(())
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Option<RegexSet>, StreamError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let sources: Vec<String> = patterns.iter().map(|p| pattern_regex(p.as_ref())).collect();
    RegexSet::new(&sources).map(Some).map_err(|err| StreamError::InvalidFilter {
        pattern: patterns
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<&str>>()
            .join(", "),
        reason: err.to_string(),
    })
}

/// Translates a dotted type pattern into an anchored regex.
fn pattern_regex(pattern: &str) -> String {
    if pattern == "*" {
        return "^.+$".to_owned();
    }
    let mut out = String::from("^");
    let mut rest = pattern;
    while let Some(at) = rest.find('*') {
        out.push_str(&regex::escape(&rest[..at]));
        if rest[at..].starts_with("**") {
            out.push_str(".+");
            rest = &rest[at + 2..];
        } else {
            out.push_str("[^.]+");
            rest = &rest[at + 1..];
        }
    }
    out.push_str(&regex::escape(rest));
    out.push('$');
    out
}

/// Strips array brackets; returns `None` for primitive arrays.
fn filtered_name(name: &str) -> Option<&str> {
    let inner = name.trim_start_matches('[');
    if inner.len() == name.len() {
        return Some(name);
    }
    inner
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_everything() {
        let opts = DecoderOptions::default();
        assert_eq!(opts.max_depth, DEFAULT_MAX_DEPTH);
        assert!(opts.check_type("com.acme.Widget").is_ok());
    }

    fn matches(pattern: &str, name: &str) -> bool {
        TypeFilter::new(&[pattern], &[]).unwrap().check(name).is_ok()
    }

    #[test]
    fn test_package_patterns() {
        assert!(matches("com.acme.*", "com.acme.Widget"));
        assert!(!matches("com.acme.*", "com.acme.inner.Widget"));
        assert!(matches("com.acme.**", "com.acme.inner.Widget"));
        assert!(!matches("com.acme.**", "com.acmeish.Widget"));
        assert!(!matches("com.acme.**", "com.acme."));
        assert!(matches("Point", "Point"));
        assert!(!matches("Point", "Point3"));
        assert!(matches("*", "a.b.C"));
        assert!(matches("com.*.Widget", "com.acme.Widget"));
        assert!(!matches("com.*.Widget", "com.acme.inner.Widget"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert_eq!(pattern_regex("a$b.*"), r"^a\$b\.[^.]+$");
        assert!(!matches("com.acme.(x|y)", "com.acme.x"));
        assert!(matches("Outer$Inner", "Outer$Inner"));
        assert!(!matches("Outer.Inner", "OuterXInner"));
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let opts = DecoderOptions::new()
            .allow("com.acme.**")
            .deny("com.acme.evil.*");
        assert!(opts.check_type("com.acme.Widget").is_ok());
        assert!(opts.check_type("com.acme.evil.Gadget").is_err());
        assert!(opts.check_type("org.other.Thing").is_err());
    }

    #[test]
    fn test_array_names_use_component() {
        let opts = DecoderOptions::new().deny("Secret");
        assert!(opts.check_type("[LSecret;").is_err());
        assert!(opts.check_type("[[LSecret;").is_err());
        assert!(opts.check_type("[I").is_ok());
    }

    #[test]
    fn test_limits() {
        let opts = DecoderOptions::new()
            .with_max_array_length(4)
            .with_max_references(10)
            .with_max_stream_bytes(100);
        assert!(opts.check_array_length(4).is_ok());
        assert!(opts.check_array_length(5).is_err());
        assert!(opts.check_references(11).is_err());
        assert!(opts.check_stream_bytes(101).is_err());
    }
}
