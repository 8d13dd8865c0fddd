//! Architecture table - trap encoding and calling convention per ISA.

/// Instruction-set architectures the ptrace backend understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Aarch64,
    X86_64,
}

/// `brk #0`, little-endian
const AARCH64_BRK: [u8; 4] = [0x00, 0x00, 0x20, 0xd4];
/// `int3`
const X86_64_INT3: [u8; 1] = [0xcc];

impl Arch {
    /// Architecture this binary was compiled for
    pub const fn host() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            Arch::Aarch64
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            Arch::X86_64
        }
    }

    /// Software breakpoint instruction bytes
    pub fn trap_instruction(self) -> &'static [u8] {
        match self {
            Arch::Aarch64 => &AARCH64_BRK,
            Arch::X86_64 => &X86_64_INT3,
        }
    }

    /// Address of the trap instruction given the pc reported at the stop.
    ///
    /// `int3` leaves the pc after the trap byte; `brk` leaves it on the
    /// instruction itself.
    pub fn trap_address(self, pc: u64) -> u64 {
        match self {
            Arch::Aarch64 => pc,
            Arch::X86_64 => pc.wrapping_sub(X86_64_INT3.len() as u64),
        }
    }

    /// First two integer argument registers of the C calling convention
    pub fn argument_registers(self) -> (&'static str, &'static str) {
        match self {
            Arch::Aarch64 => ("x0", "x1"),
            Arch::X86_64 => ("rdi", "rsi"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Arch::Aarch64 => "aarch64",
            Arch::X86_64 => "x86_64",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_address() {
        assert_eq!(Arch::X86_64.trap_address(0x401001), 0x401000);
        assert_eq!(Arch::Aarch64.trap_address(0x401000), 0x401000);
    }

    #[test]
    fn test_argument_registers() {
        assert_eq!(Arch::Aarch64.argument_registers(), ("x0", "x1"));
        assert_eq!(Arch::X86_64.argument_registers(), ("rdi", "rsi"));
    }

    #[test]
    fn test_brk_encoding() {
        let word = u32::from_le_bytes(AARCH64_BRK);
        assert_eq!(word, 0xD4200000);
    }
}
