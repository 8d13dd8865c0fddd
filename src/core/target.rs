//! Target - breakpoint definitions for one debuggee (or for all of them).
//!
//! The session owns a dummy target that exists before any process does.
//! Breakpoints created on it are templates: every concrete target built for
//! a launched or attached process inherits a copy, callback binding and
//! auto-continue flag included.

use std::collections::BTreeSet;

use crate::core::breakpoint::{Breakpoint, BreakpointId, SymbolMatcher};
use crate::core::callbacks::CallbackRegistry;
use crate::core::debugger::DebugError;
use crate::debug::Frame;
use crate::loader::SymbolInfo;

/// Result of dispatching a trap to the breakpoints at its address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitOutcome {
    /// Enabled breakpoints that owned the address
    pub breakpoint_ids: Vec<BreakpointId>,
    /// Whether the debuggee should resume without operator action
    pub auto_continue: bool,
}

#[derive(Debug, Clone)]
pub struct Target {
    breakpoints: Vec<Breakpoint>,
    next_id: BreakpointId,
    is_dummy: bool,
}

impl Target {
    /// Template target holding breakpoints for processes not yet known
    pub fn dummy() -> Self {
        Self {
            breakpoints: Vec::new(),
            next_id: 1,
            is_dummy: true,
        }
    }

    /// Concrete target inheriting every breakpoint of `template`
    pub fn inherit(template: &Target) -> Self {
        Self {
            breakpoints: template
                .breakpoints
                .iter()
                .map(Breakpoint::as_template)
                .collect(),
            next_id: template.next_id,
            is_dummy: false,
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.is_dummy
    }

    /// Create a breakpoint matching symbol names against `pattern`
    pub fn breakpoint_create_by_regex(&mut self, pattern: &str) -> Result<BreakpointId, DebugError> {
        let matcher = SymbolMatcher::regex(pattern)?;
        Ok(self.add_breakpoint(matcher))
    }

    /// Create a breakpoint on an exact symbol name
    pub fn breakpoint_create_by_name(&mut self, name: &str) -> BreakpointId {
        self.add_breakpoint(SymbolMatcher::Name(name.to_string()))
    }

    fn add_breakpoint(&mut self, matcher: SymbolMatcher) -> BreakpointId {
        let id = self.next_id;
        self.next_id += 1;
        log::debug!("Created breakpoint {} on {}", id, matcher);
        self.breakpoints.push(Breakpoint::new(id, matcher));
        id
    }

    pub fn breakpoint(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.iter().find(|bp| bp.id() == id)
    }

    pub fn breakpoint_mut(&mut self, id: BreakpointId) -> Option<&mut Breakpoint> {
        self.breakpoints.iter_mut().find(|bp| bp.id() == id)
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Match symbols against every breakpoint.
    ///
    /// Returns the addresses that gained their first location, sorted; the
    /// caller inserts traps for those.
    pub fn resolve_locations<'a>(
        &mut self,
        symbols: impl IntoIterator<Item = &'a SymbolInfo>,
    ) -> Vec<u64> {
        let known = self.addresses();
        let mut fresh = BTreeSet::new();

        for symbol in symbols {
            for bp in &mut self.breakpoints {
                if !bp.matcher().matches(&symbol.name) {
                    continue;
                }
                if bp.add_location(symbol.address, &symbol.name, Some(&symbol.module)) {
                    log::info!(
                        "Breakpoint {} resolved: {} @ {:#x} ({})",
                        bp.id(),
                        symbol.name,
                        symbol.address,
                        symbol.module
                    );
                    if !known.contains(&symbol.address) {
                        fresh.insert(symbol.address);
                    }
                }
            }
        }

        fresh.into_iter().collect()
    }

    /// Every address any breakpoint resolved to
    pub fn addresses(&self) -> BTreeSet<u64> {
        self.breakpoints
            .iter()
            .flat_map(|bp| bp.locations().iter().map(|loc| loc.address))
            .collect()
    }

    /// Forget resolved locations (exec replaced the process image)
    pub fn clear_locations(&mut self) {
        for bp in &mut self.breakpoints {
            bp.clear_locations();
        }
    }

    /// Dispatch a trap at `address`: count the hit and run bound callbacks.
    ///
    /// Returns `None` when no breakpoint owns the address.
    pub fn handle_hit(
        &mut self,
        address: u64,
        frame: &mut dyn Frame,
        callbacks: &CallbackRegistry,
    ) -> Option<HitOutcome> {
        let mut owned = false;
        let mut outcome = HitOutcome {
            breakpoint_ids: Vec::new(),
            auto_continue: true,
        };

        for bp in &mut self.breakpoints {
            let Some(location) = bp.location_at(address).cloned() else {
                continue;
            };
            owned = true;
            if !bp.is_enabled() {
                continue;
            }

            bp.record_hit();
            outcome.breakpoint_ids.push(bp.id());
            outcome.auto_continue &= bp.auto_continue();
            log::debug!(
                "Breakpoint {} hit at {:#x} ({}) by thread {}, hit count {}",
                bp.id(),
                address,
                location.symbol,
                frame.thread_id(),
                bp.hit_count()
            );

            if let Some(name) = bp.script_callback() {
                match callbacks.get(name) {
                    Some(callback) => callback(frame, &location, bp.callback_args()),
                    None => log::warn!(
                        "Breakpoint {} is bound to unknown callback '{}'",
                        bp.id(),
                        name
                    ),
                }
            }
        }

        owned.then_some(outcome)
    }
}
