//! Common types for debugging functionality.

/// Debug event received from the debugger backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// Thread created
    ThreadCreated { tid: u32 },
    /// Thread exited
    ThreadExited { tid: u32 },
    /// Process image replaced by exec
    Exec { tid: u32 },
    /// Trap instruction at a known address was hit
    BreakpointHit { address: u64, tid: u32 },
    /// Thread stopped with a signal that belongs to the debuggee
    Signal { tid: u32, signal: i32 },
    /// Process exited
    ProcessExited { exit_code: i32 },
    /// Process killed by a signal
    ProcessSignaled { signal: i32 },
    /// Operator asked the session to stop (SIGINT/SIGTERM)
    Interrupted,
}

impl DebugEvent {
    /// Whether the debuggee is gone after this event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DebugEvent::ProcessExited { .. } | DebugEvent::ProcessSignaled { .. }
        )
    }
}

/// Debug session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugStatus {
    #[default]
    Detached,
    Running,
    Suspended,
    Terminated,
}

/// Register snapshot of a stopped thread, addressable by name.
///
/// An empty snapshot stands for "registers could not be read"; every lookup
/// on it fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    pc: u64,
    values: Vec<(&'static str, u64)>,
}

impl Registers {
    pub fn new(pc: u64, values: Vec<(&'static str, u64)>) -> Self {
        Self { pc, values }
    }

    /// Snapshot used when the backend failed to fetch registers
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Look up a register by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<u64> {
        self.values
            .iter()
            .find(|(reg, _)| reg.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value)
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_ignores_case() {
        let regs = Registers::new(0x4000, vec![("x0", 0x1000), ("x1", 4096)]);
        assert_eq!(regs.get("X0"), Some(0x1000));
        assert_eq!(regs.get("x1"), Some(4096));
        assert_eq!(regs.get("x2"), None);
        assert_eq!(regs.pc(), 0x4000);
    }

    #[test]
    fn test_unavailable_registers() {
        let regs = Registers::unavailable();
        assert!(regs.is_empty());
        assert_eq!(regs.get("rdi"), None);
    }

    #[test]
    fn test_terminal_events() {
        assert!(DebugEvent::ProcessExited { exit_code: 0 }.is_terminal());
        assert!(DebugEvent::ProcessSignaled { signal: 9 }.is_terminal());
        assert!(!DebugEvent::Interrupted.is_terminal());
    }
}
