//! Frame of a ptrace-stopped thread.

use crate::core::memory::MemoryManager;
use crate::debug::types::Registers;
use crate::debug::{Frame, ProcessMemory, RegisterValue};

/// Register snapshot plus the process memory of a stopped thread
pub struct LinuxFrame<'a> {
    tid: u32,
    pc: u64,
    registers: Registers,
    memory: &'a mut MemoryManager,
}

impl<'a> LinuxFrame<'a> {
    pub fn new(tid: u32, pc: u64, registers: Registers, memory: &'a mut MemoryManager) -> Self {
        Self {
            tid,
            pc,
            registers,
            memory,
        }
    }
}

impl Frame for LinuxFrame<'_> {
    fn thread_id(&self) -> u32 {
        self.tid
    }

    fn pc(&self) -> u64 {
        self.pc
    }

    fn find_register(&self, name: &str) -> Option<RegisterValue> {
        self.registers
            .get(name)
            .map(|value| RegisterValue::new(name, value))
    }

    fn process(&mut self) -> &mut dyn ProcessMemory {
        &mut *self.memory
    }
}
