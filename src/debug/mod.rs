//! Debug module - Frame and process abstractions plus the ptrace backend.
//!
//! Breakpoint callbacks only see the traits defined here:
//! - `Frame` for register access of the stopped thread
//! - `ProcessMemory` for reading/writing the debuggee's address space
//!
//! The Linux backend implements both on top of ptrace and `/proc`.

pub mod arch;
pub mod types;

#[cfg(target_os = "linux")]
pub mod linux;

use crate::core::memory::MemoryError;

/// A register looked up on a stopped frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterValue {
    name: String,
    value: Option<u64>,
}

impl RegisterValue {
    /// A register whose value was read successfully
    pub fn new(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
        }
    }

    /// A register that exists but whose value could not be read
    pub fn invalid(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }

    /// Register contents, `None` when the register is not valid
    pub fn value_as_unsigned(&self) -> Option<u64> {
        self.value
    }
}

/// Memory access into the debuggee
pub trait ProcessMemory {
    /// Read `size` bytes starting at `address`
    fn read_memory(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError>;

    /// Write `data` at `address`, returning the number of bytes written
    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<usize, MemoryError>;
}

/// Execution frame of a thread stopped at a breakpoint
pub trait Frame {
    /// Thread that hit the breakpoint
    fn thread_id(&self) -> u32;

    /// Address of the breakpoint instruction
    fn pc(&self) -> u64;

    /// Find a register by name; `None` if the frame has no such register
    fn find_register(&self, name: &str) -> Option<RegisterValue>;

    /// Memory of the process owning this frame
    fn process(&mut self) -> &mut dyn ProcessMemory;
}
