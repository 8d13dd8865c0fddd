//! Register access via ptrace.
//!
//! x86_64 uses `PTRACE_GETREGS`; aarch64 has no such request and goes
//! through `PTRACE_GETREGSET` with `NT_PRSTATUS`.

use nix::unistd::Pid;

use crate::debug::types::Registers;

#[cfg(target_arch = "x86_64")]
mod imp {
    use super::*;
    use nix::sys::ptrace;

    pub fn read(tid: Pid) -> nix::Result<Registers> {
        let r = ptrace::getregs(tid)?;
        Ok(Registers::new(
            r.rip,
            vec![
                ("rax", r.rax),
                ("rbx", r.rbx),
                ("rcx", r.rcx),
                ("rdx", r.rdx),
                ("rsi", r.rsi),
                ("rdi", r.rdi),
                ("rbp", r.rbp),
                ("rsp", r.rsp),
                ("r8", r.r8),
                ("r9", r.r9),
                ("r10", r.r10),
                ("r11", r.r11),
                ("r12", r.r12),
                ("r13", r.r13),
                ("r14", r.r14),
                ("r15", r.r15),
                ("rip", r.rip),
                ("rflags", r.eflags),
            ],
        ))
    }

    pub fn set_pc(tid: Pid, pc: u64) -> nix::Result<()> {
        let mut r = ptrace::getregs(tid)?;
        r.rip = pc;
        ptrace::setregs(tid, r)
    }
}

#[cfg(target_arch = "aarch64")]
mod imp {
    use super::*;
    use nix::errno::Errno;
    use std::mem;

    const NAMES: [&str; 31] = [
        "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13",
        "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25",
        "x26", "x27", "x28", "x29", "x30",
    ];

    fn raw(tid: Pid) -> nix::Result<libc::user_regs_struct> {
        // SAFETY: user_regs_struct is plain data; all-zero is a valid value
        let mut regs: libc::user_regs_struct = unsafe { mem::zeroed() };
        let mut iovec = libc::iovec {
            iov_base: &mut regs as *mut libc::user_regs_struct as *mut libc::c_void,
            iov_len: mem::size_of::<libc::user_regs_struct>(),
        };
        let result = unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGSET,
                tid.as_raw(),
                libc::NT_PRSTATUS,
                &mut iovec as *mut libc::iovec,
            )
        };
        Errno::result(result)?;
        Ok(regs)
    }

    pub fn read(tid: Pid) -> nix::Result<Registers> {
        let r = raw(tid)?;
        let mut values: Vec<(&'static str, u64)> = NAMES.iter().copied().zip(r.regs).collect();
        values.push(("fp", r.regs[29]));
        values.push(("lr", r.regs[30]));
        values.push(("sp", r.sp));
        values.push(("pc", r.pc));
        values.push(("cpsr", r.pstate));
        Ok(Registers::new(r.pc, values))
    }

    pub fn set_pc(tid: Pid, pc: u64) -> nix::Result<()> {
        let mut r = raw(tid)?;
        r.pc = pc;
        let iovec = libc::iovec {
            iov_base: &mut r as *mut libc::user_regs_struct as *mut libc::c_void,
            iov_len: mem::size_of::<libc::user_regs_struct>(),
        };
        let result = unsafe {
            libc::ptrace(
                libc::PTRACE_SETREGSET,
                tid.as_raw(),
                libc::NT_PRSTATUS,
                &iovec as *const libc::iovec,
            )
        };
        Errno::result(result).map(drop)
    }
}

pub use imp::{read, set_pc};
