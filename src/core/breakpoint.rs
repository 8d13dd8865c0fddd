//! Breakpoint definitions and resolved locations.
//!
//! A `Breakpoint` is the logical, user-facing definition: what symbols it
//! matches, which callback runs on a hit, and whether the debuggee resumes
//! on its own afterwards. Each concrete address it resolved to is a
//! `BreakpointLocation`.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

use crate::core::debugger::DebugError;

pub type BreakpointId = u32;

/// Key/value arguments handed to a breakpoint callback on every hit
pub type CallbackArgs = BTreeMap<String, String>;

/// How a breakpoint selects symbols
#[derive(Debug, Clone)]
pub enum SymbolMatcher {
    /// Exact symbol name
    Name(String),
    /// Regular expression over symbol names
    Regex(Regex),
}

impl SymbolMatcher {
    /// Compile a regular expression matcher
    pub fn regex(pattern: &str) -> Result<Self, DebugError> {
        Regex::new(pattern)
            .map(SymbolMatcher::Regex)
            .map_err(|e| DebugError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn matches(&self, symbol: &str) -> bool {
        match self {
            SymbolMatcher::Name(name) => name == symbol,
            SymbolMatcher::Regex(re) => re.is_match(symbol),
        }
    }
}

impl fmt::Display for SymbolMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolMatcher::Name(name) => write!(f, "name '{}'", name),
            SymbolMatcher::Regex(re) => write!(f, "regex '{}'", re.as_str()),
        }
    }
}

/// A concrete address a breakpoint resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointLocation {
    /// Owning breakpoint
    pub breakpoint_id: BreakpointId,
    /// Absolute address in the debuggee
    pub address: u64,
    /// Symbol the address came from
    pub symbol: String,
    /// Module (shared object path) containing the symbol
    pub module: Option<String>,
}

/// Logical breakpoint
#[derive(Debug, Clone)]
pub struct Breakpoint {
    id: BreakpointId,
    matcher: SymbolMatcher,
    /// Fully-qualified name of the callback, looked up at hit time
    callback: Option<String>,
    callback_args: CallbackArgs,
    auto_continue: bool,
    enabled: bool,
    hit_count: u64,
    locations: Vec<BreakpointLocation>,
}

impl Breakpoint {
    pub fn new(id: BreakpointId, matcher: SymbolMatcher) -> Self {
        Self {
            id,
            matcher,
            callback: None,
            callback_args: CallbackArgs::new(),
            auto_continue: false,
            enabled: true,
            hit_count: 0,
            locations: Vec::new(),
        }
    }

    pub fn id(&self) -> BreakpointId {
        self.id
    }

    pub fn matcher(&self) -> &SymbolMatcher {
        &self.matcher
    }

    /// Bind a callback by its registered, fully-qualified name
    pub fn set_script_callback_function(&mut self, name: impl Into<String>) {
        self.callback = Some(name.into());
    }

    pub fn script_callback(&self) -> Option<&str> {
        self.callback.as_deref()
    }

    pub fn set_callback_args(&mut self, args: CallbackArgs) {
        self.callback_args = args;
    }

    pub fn callback_args(&self) -> &CallbackArgs {
        &self.callback_args
    }

    pub fn set_auto_continue(&mut self, auto_continue: bool) {
        self.auto_continue = auto_continue;
    }

    pub fn auto_continue(&self) -> bool {
        self.auto_continue
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    pub(crate) fn record_hit(&mut self) {
        self.hit_count += 1;
    }

    pub fn locations(&self) -> &[BreakpointLocation] {
        &self.locations
    }

    pub fn location_at(&self, address: u64) -> Option<&BreakpointLocation> {
        self.locations.iter().find(|loc| loc.address == address)
    }

    /// Add a resolved location; returns false if the address is already known
    pub fn add_location(&mut self, address: u64, symbol: &str, module: Option<&str>) -> bool {
        if self.location_at(address).is_some() {
            return false;
        }
        self.locations.push(BreakpointLocation {
            breakpoint_id: self.id,
            address,
            symbol: symbol.to_string(),
            module: module.map(str::to_string),
        });
        true
    }

    /// Drop every resolved location (process image changed)
    pub fn clear_locations(&mut self) {
        self.locations.clear();
    }

    /// Copy of this definition with no runtime state, used when a template
    /// breakpoint is carried over to a concrete target
    pub(crate) fn as_template(&self) -> Self {
        Self {
            hit_count: 0,
            locations: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_matcher_is_anchored_by_pattern() {
        let matcher = SymbolMatcher::regex("^NOTIFY_DEBUGGER_ABOUT_RX_PAGES$").unwrap();
        assert!(matcher.matches("NOTIFY_DEBUGGER_ABOUT_RX_PAGES"));
        assert!(!matcher.matches("NOTIFY_DEBUGGER_ABOUT_RX_PAGES_impl"));
        assert!(!matcher.matches("_NOTIFY_DEBUGGER_ABOUT_RX_PAGES"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = SymbolMatcher::regex("(unclosed").unwrap_err();
        assert!(matches!(err, DebugError::InvalidPattern { .. }));
    }

    #[test]
    fn test_name_matcher() {
        let matcher = SymbolMatcher::Name("main".into());
        assert!(matcher.matches("main"));
        assert!(!matcher.matches("main2"));
        assert_eq!(matcher.to_string(), "name 'main'");
    }

    #[test]
    fn test_locations_are_deduplicated() {
        let mut bp = Breakpoint::new(1, SymbolMatcher::Name("f".into()));
        assert!(bp.add_location(0x1000, "f", Some("/lib/a.so")));
        assert!(!bp.add_location(0x1000, "f", Some("/lib/a.so")));
        assert!(bp.add_location(0x2000, "f", None));
        assert_eq!(bp.locations().len(), 2);
        assert_eq!(bp.location_at(0x1000).unwrap().breakpoint_id, 1);
    }

    #[test]
    fn test_template_copy_drops_runtime_state() {
        let mut bp = Breakpoint::new(3, SymbolMatcher::Name("f".into()));
        bp.set_script_callback_function("crate::f");
        bp.set_auto_continue(true);
        bp.add_location(0x1000, "f", None);
        bp.record_hit();

        let copy = bp.as_template();
        assert_eq!(copy.id(), 3);
        assert_eq!(copy.script_callback(), Some("crate::f"));
        assert!(copy.auto_continue());
        assert_eq!(copy.hit_count(), 0);
        assert!(copy.locations().is_empty());
    }
}
