//! Callback registry - breakpoint callbacks bound by name.
//!
//! Breakpoints store the fully-qualified name of their callback instead of a
//! function pointer. The name is looked up here when the breakpoint fires,
//! so a binding made on the dummy target keeps working on every concrete
//! target that inherits it.

use std::collections::HashMap;
use std::fmt;

use crate::core::breakpoint::{BreakpointLocation, CallbackArgs};
use crate::debug::Frame;

/// Function invoked when a breakpoint bound to it is hit
pub type BreakpointCallback = fn(&mut dyn Frame, &BreakpointLocation, &CallbackArgs);

/// Name → callback table owned by the debugger session
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, BreakpointCallback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback, returning the one previously bound to `name`
    pub fn register(
        &mut self,
        name: impl Into<String>,
        callback: BreakpointCallback,
    ) -> Option<BreakpointCallback> {
        let name = name.into();
        log::debug!("Registering breakpoint callback '{}'", name);
        self.callbacks.insert(name, callback)
    }

    pub fn get(&self, name: &str) -> Option<BreakpointCallback> {
        self.callbacks.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.callbacks.keys().collect();
        names.sort();
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut dyn Frame, _: &BreakpointLocation, _: &CallbackArgs) {}

    #[test]
    fn test_register_and_lookup() {
        let mut registry = CallbackRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.register("helper::noop", noop).is_none());
        assert!(registry.contains("helper::noop"));
        assert!(registry.get("helper::noop").is_some());
        assert!(registry.get("helper::missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = CallbackRegistry::new();
        registry.register("helper::noop", noop);
        assert!(registry.register("helper::noop", noop).is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(
            format!("{:?}", registry),
            "CallbackRegistry { callbacks: [\"helper::noop\"] }"
        );
    }
}
