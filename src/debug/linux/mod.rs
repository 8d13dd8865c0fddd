//! Linux-specific debugger implementation using ptrace.
//!
//! Every thread of the debuggee is traced (`PTRACE_O_TRACECLONE`), so a
//! breakpoint hit in any thread is reported. Memory goes through
//! `/proc/<pid>/mem` via `MemoryManager`.
//!
//! Stepping over a trap is all-stop: the other threads are halted with a
//! thread-directed SIGSTOP while the original instruction is back in place,
//! so none of them can run past the breakpoint unseen. Stops they report
//! meanwhile are queued and handed out by `wait_event` afterwards.

mod frame;
mod regs;

pub use frame::LinuxFrame;

use nix::errno::Errno;
use nix::sys::ptrace::{self, Event, Options};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::ffi::CString;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::debugger::DebugError;
use crate::core::memory::MemoryManager;
use crate::debug::arch::Arch;
use crate::debug::types::{DebugEvent, Registers};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT/SIGTERM into `DebugEvent::Interrupted`.
///
/// Installed without `SA_RESTART` so a blocked `waitpid` returns `EINTR`.
pub fn install_interrupt_handler() -> Result<(), DebugError> {
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic
        unsafe { signal::sigaction(sig, &action) }
            .map_err(|e| DebugError::EventError(format!("sigaction({}): {}", sig, e)))?;
    }
    Ok(())
}

/// Send `sig` to one thread of the process `pid`
fn tgkill(pid: Pid, tid: Pid, sig: Signal) -> nix::Result<()> {
    // SAFETY: plain syscall with integer arguments
    let result = unsafe {
        libc::syscall(
            libc::SYS_tgkill,
            pid.as_raw(),
            tid.as_raw(),
            sig as libc::c_int,
        )
    };
    Errno::result(result).map(drop)
}

/// Result of stepping a thread over a trap
#[derive(Debug)]
pub enum StepOutcome {
    /// Original instruction executed; `signal` arrived meanwhile and is
    /// still owed to the thread
    Stepped { signal: Option<Signal> },
    /// The thread (or the whole process) is gone
    Exited(DebugEvent),
}

/// A ptrace-controlled process
pub struct LinuxProcess {
    pid: Pid,
    arch: Arch,
    threads: BTreeSet<Pid>,
    /// Announced by a clone event; their initial SIGSTOP is still to come
    fresh_threads: HashSet<Pid>,
    /// Threads sitting in a ptrace stop
    stopped: HashSet<Pid>,
    /// Threads with a SIGSTOP from us that has not been reported yet
    stopping: HashSet<Pid>,
    /// Threads reported at a trap and not yet stepped over it
    at_trap: HashMap<Pid, u64>,
    /// Wait statuses collected while stopping threads
    pending: VecDeque<WaitStatus>,
    memory: MemoryManager,
    /// Trap address -> original instruction bytes
    traps: HashMap<u64, Vec<u8>>,
    launched: bool,
}

impl LinuxProcess {
    fn new(pid: Pid, launched: bool) -> Self {
        Self {
            pid,
            arch: Arch::host(),
            threads: BTreeSet::new(),
            fresh_threads: HashSet::new(),
            stopped: HashSet::new(),
            stopping: HashSet::new(),
            at_trap: HashMap::new(),
            pending: VecDeque::new(),
            memory: MemoryManager::for_process(pid.as_raw() as u32),
            traps: HashMap::new(),
            launched,
        }
    }

    fn options(launched: bool) -> Options {
        let options = Options::PTRACE_O_TRACECLONE | Options::PTRACE_O_TRACEEXEC;
        if launched {
            options | Options::PTRACE_O_EXITKILL
        } else {
            options
        }
    }

    /// Fork and exec `program` under ptrace; returns stopped after exec
    pub fn launch(program: &str, args: &[String]) -> Result<Self, DebugError> {
        let launch_err = |reason: String| DebugError::LaunchFailed {
            program: program.to_string(),
            reason,
        };

        let argv = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .map(CString::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| launch_err(e.to_string()))?;

        log::info!("Launching {} {:?}", program, args);

        // SAFETY: the child only calls ptrace, exec and _exit before exec
        match unsafe { fork() }.map_err(|e| launch_err(e.to_string()))? {
            ForkResult::Child => {
                if ptrace::traceme().is_ok() {
                    let _ = execvp(&argv[0], &argv);
                }
                unsafe { libc::_exit(127) }
            }
            ForkResult::Parent { child } => {
                match waitpid(child, None).map_err(|e| launch_err(e.to_string()))? {
                    WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
                    WaitStatus::Exited(_, code) => {
                        return Err(launch_err(format!("exited with status {} before exec", code)))
                    }
                    other => return Err(launch_err(format!("unexpected initial stop: {:?}", other))),
                }

                ptrace::setoptions(child, Self::options(true))
                    .map_err(|e| launch_err(e.to_string()))?;

                let mut process = Self::new(child, true);
                process.threads.insert(child);
                process.stopped.insert(child);
                log::info!("Launched process {} ({})", child, process.arch.name());
                Ok(process)
            }
        }
    }

    /// Attach (`PTRACE_ATTACH`) to every thread of a running process;
    /// returns with all of them stopped
    pub fn attach(pid: u32) -> Result<Self, DebugError> {
        let main = Pid::from_raw(pid as i32);
        let attach_err = |reason: String| DebugError::AttachFailed { pid, reason };
        let mut process = Self::new(main, false);

        // Threads keep spawning while we attach; repeat until the list is stable
        loop {
            let pending: Vec<Pid> = list_tasks(pid)
                .map_err(|e| attach_err(e.to_string()))?
                .into_iter()
                .filter(|tid| !process.threads.contains(tid))
                .collect();
            if pending.is_empty() {
                break;
            }

            for tid in pending {
                match ptrace::attach(tid) {
                    Ok(()) => {}
                    Err(Errno::ESRCH) if tid != main => continue,
                    Err(e) => return Err(attach_err(e.to_string())),
                }
                if !process.wait_attach_stop(tid)? {
                    continue;
                }
                ptrace::setoptions(tid, Self::options(false))
                    .map_err(|e| attach_err(e.to_string()))?;
                process.threads.insert(tid);
                process.stopped.insert(tid);
            }
        }

        log::info!(
            "Attached to process {} ({} threads)",
            pid,
            process.threads.len()
        );
        Ok(process)
    }

    /// Wait for the SIGSTOP that PTRACE_ATTACH queued. Returns false if the
    /// thread exited first.
    fn wait_attach_stop(&self, tid: Pid) -> Result<bool, DebugError> {
        loop {
            match waitpid(tid, Some(WaitPidFlag::__WALL)) {
                Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) => return Ok(true),
                Ok(WaitStatus::Stopped(_, sig)) => {
                    // Someone else's signal got there first; let it through
                    let _ = ptrace::cont(tid, sig);
                }
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => return Ok(false),
                Ok(_) => {}
                Err(Errno::EINTR) => {}
                Err(e) => {
                    return Err(DebugError::AttachFailed {
                        pid: self.pid(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    pub fn is_launched(&self) -> bool {
        self.launched
    }

    /// Number of traced threads
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn registers(&self, tid: u32) -> Result<Registers, DebugError> {
        regs::read(Pid::from_raw(tid as i32)).map_err(|e| DebugError::Registers {
            tid,
            reason: e.to_string(),
        })
    }

    /// Frame of a thread stopped at `address`.
    ///
    /// A register read failure yields a frame with no registers rather than
    /// an error; callbacks see it as unreadable registers.
    pub fn frame(&mut self, tid: u32, address: u64) -> LinuxFrame<'_> {
        let registers = self.registers(tid).unwrap_or_else(|e| {
            log::warn!("{}", e);
            Registers::unavailable()
        });
        LinuxFrame::new(tid, address, registers, &mut self.memory)
    }

    pub fn has_trap(&self, address: u64) -> bool {
        self.traps.contains_key(&address)
    }

    /// Patch the trap instruction over `address`, saving the original bytes
    pub fn insert_trap(&mut self, address: u64) -> Result<(), DebugError> {
        if self.has_trap(address) {
            return Ok(());
        }
        let trap = self.arch.trap_instruction();
        let original = self
            .memory
            .read(address, trap.len())
            .map_err(|e| DebugError::BreakpointError {
                address,
                reason: e.to_string(),
            })?;
        self.write_bytes(address, trap)?;
        self.traps.insert(address, original);
        log::debug!("Trap inserted at {:#x}", address);
        Ok(())
    }

    /// Restore the original bytes at `address`
    pub fn remove_trap(&mut self, address: u64) -> Result<(), DebugError> {
        if let Some(original) = self.traps.remove(&address) {
            self.write_bytes(address, &original)?;
            log::debug!("Trap removed at {:#x}", address);
        }
        Ok(())
    }

    fn write_bytes(&mut self, address: u64, bytes: &[u8]) -> Result<(), DebugError> {
        let written = self
            .memory
            .write(address, bytes)
            .map_err(|e| DebugError::BreakpointError {
                address,
                reason: e.to_string(),
            })?;
        if written != bytes.len() {
            return Err(DebugError::BreakpointError {
                address,
                reason: format!("short write ({} of {} bytes)", written, bytes.len()),
            });
        }
        Ok(())
    }

    /// Resume a stopped thread, delivering `signal` if given
    pub fn resume(&mut self, tid: u32, signal: Option<Signal>) -> Result<(), DebugError> {
        let pid = Pid::from_raw(tid as i32);
        self.stopped.remove(&pid);
        self.at_trap.remove(&pid);
        match ptrace::cont(pid, signal) {
            Ok(()) => Ok(()),
            // Thread died while stopped; its exit is reported by wait_event
            Err(Errno::ESRCH) => {
                log::debug!("Thread {} vanished before resume", tid);
                Ok(())
            }
            Err(e) => Err(DebugError::EventError(format!("resume {}: {}", tid, e))),
        }
    }

    /// Resume every thread currently held in a ptrace stop
    pub fn resume_all(&mut self) -> Result<(), DebugError> {
        let stopped: Vec<Pid> = self.stopped.iter().copied().collect();
        for tid in stopped {
            self.resume(tid.as_raw() as u32, None)?;
        }
        Ok(())
    }

    /// Wait for the next event that needs the session's attention.
    ///
    /// `BreakpointHit`, `Signal` and `Exec` leave the reporting thread
    /// stopped; the caller must `resume` it. New-thread bookkeeping is
    /// handled here.
    pub fn wait_event(&mut self) -> Result<DebugEvent, DebugError> {
        loop {
            if INTERRUPTED.swap(false, Ordering::SeqCst) {
                return Ok(DebugEvent::Interrupted);
            }

            let status = match self.pending.pop_front() {
                Some(status) => status,
                None => match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
                    Ok(status) => status,
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(DebugError::EventError(format!("waitpid: {}", e))),
                },
            };

            if let Some(event) = self.dispatch(status)? {
                return Ok(event);
            }
        }
    }

    /// Turn one wait status into an event, or handle it internally
    fn dispatch(&mut self, status: WaitStatus) -> Result<Option<DebugEvent>, DebugError> {
        match status {
            WaitStatus::Exited(tid, exit_code) => {
                self.forget_thread(tid);
                if tid == self.pid {
                    return Ok(Some(DebugEvent::ProcessExited { exit_code }));
                }
                Ok(Some(DebugEvent::ThreadExited {
                    tid: tid.as_raw() as u32,
                }))
            }
            WaitStatus::Signaled(tid, sig, _) => {
                self.forget_thread(tid);
                if tid == self.pid {
                    return Ok(Some(DebugEvent::ProcessSignaled { signal: sig as i32 }));
                }
                Ok(Some(DebugEvent::ThreadExited {
                    tid: tid.as_raw() as u32,
                }))
            }
            WaitStatus::Stopped(tid, Signal::SIGSTOP) if self.stopping.remove(&tid) => {
                // Our own stop request, arriving after the thread was let go
                self.resume(tid.as_raw() as u32, None)?;
                Ok(None)
            }
            WaitStatus::Stopped(tid, Signal::SIGSTOP)
                if self.fresh_threads.contains(&tid) || !self.threads.contains(&tid) =>
            {
                // Initial stop of a new thread
                self.fresh_threads.remove(&tid);
                self.threads.insert(tid);
                self.resume(tid.as_raw() as u32, None)?;
                Ok(None)
            }
            WaitStatus::Stopped(tid, Signal::SIGTRAP) => {
                self.stopped.insert(tid);
                let raw = tid.as_raw() as u32;
                match regs::read(tid) {
                    Ok(regs) => {
                        let address = self.arch.trap_address(regs.pc());
                        if self.has_trap(address) {
                            self.at_trap.insert(tid, address);
                            return Ok(Some(DebugEvent::BreakpointHit { address, tid: raw }));
                        }
                    }
                    Err(e) => log::warn!("Cannot read pc of thread {}: {}", raw, e),
                }
                Ok(Some(DebugEvent::Signal {
                    tid: raw,
                    signal: Signal::SIGTRAP as i32,
                }))
            }
            WaitStatus::Stopped(tid, sig) => {
                self.stopped.insert(tid);
                Ok(Some(DebugEvent::Signal {
                    tid: tid.as_raw() as u32,
                    signal: sig as i32,
                }))
            }
            WaitStatus::PtraceEvent(tid, _, event) if event == Event::PTRACE_EVENT_CLONE as i32 => {
                let new_tid = self.register_clone(tid);
                self.resume(tid.as_raw() as u32, None)?;
                Ok(new_tid.map(|tid| DebugEvent::ThreadCreated { tid }))
            }
            WaitStatus::PtraceEvent(_, _, event) if event == Event::PTRACE_EVENT_EXEC as i32 => {
                // New image: old traps are gone and only the leader survives
                self.traps.clear();
                self.threads.clear();
                self.fresh_threads.clear();
                self.stopped.clear();
                self.stopping.clear();
                self.at_trap.clear();
                self.threads.insert(self.pid);
                self.stopped.insert(self.pid);
                Ok(Some(DebugEvent::Exec { tid: self.pid() }))
            }
            WaitStatus::PtraceEvent(tid, _, _) | WaitStatus::PtraceSyscall(tid) => {
                self.resume(tid.as_raw() as u32, None)?;
                Ok(None)
            }
            WaitStatus::Continued(_) | WaitStatus::StillAlive => Ok(None),
        }
    }

    fn register_clone(&mut self, parent: Pid) -> Option<u32> {
        match ptrace::getevent(parent) {
            Ok(raw) => {
                let tid = Pid::from_raw(raw as i32);
                if self.threads.insert(tid) {
                    self.fresh_threads.insert(tid);
                }
                Some(raw as u32)
            }
            Err(e) => {
                log::warn!("Cannot read new thread id from {}: {}", parent, e);
                None
            }
        }
    }

    fn forget_thread(&mut self, tid: Pid) {
        self.threads.remove(&tid);
        self.fresh_threads.remove(&tid);
        self.stopped.remove(&tid);
        self.stopping.remove(&tid);
        self.at_trap.remove(&tid);
    }

    /// Bring every running thread except `except` into a ptrace stop.
    ///
    /// Returns the threads stopped here with nothing to report; hand them to
    /// `release_threads` afterwards. A thread that stops for another reason
    /// first (trap, signal, exit) stays stopped and its status is queued for
    /// `wait_event`; the SIGSTOP we sent it is swallowed when it arrives.
    fn stop_threads(&mut self, except: Option<Pid>) -> Result<Vec<Pid>, DebugError> {
        let mut waiting: HashSet<Pid> = HashSet::new();
        let running: Vec<Pid> = self
            .threads
            .iter()
            .copied()
            .filter(|tid| Some(*tid) != except && !self.stopped.contains(tid))
            .collect();

        for tid in running {
            if self.fresh_threads.contains(&tid) || self.stopping.contains(&tid) {
                // A SIGSTOP is already on its way
                waiting.insert(tid);
                continue;
            }
            match tgkill(self.pid, tid, Signal::SIGSTOP) {
                Ok(()) => {
                    self.stopping.insert(tid);
                    waiting.insert(tid);
                }
                // Exiting; the exit status is collected later
                Err(Errno::ESRCH) => {}
                Err(e) => {
                    return Err(DebugError::EventError(format!("tgkill {}: {}", tid, e)))
                }
            }
        }

        let mut quiet = Vec::new();
        while !waiting.is_empty() {
            let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
                Ok(status) => status,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break,
                Err(e) => return Err(DebugError::EventError(format!("waitpid: {}", e))),
            };

            match status {
                WaitStatus::Stopped(tid, Signal::SIGSTOP)
                    if self.stopping.remove(&tid)
                        || self.fresh_threads.remove(&tid)
                        || !self.threads.contains(&tid) =>
                {
                    self.threads.insert(tid);
                    self.stopped.insert(tid);
                    waiting.remove(&tid);
                    quiet.push(tid);
                }
                WaitStatus::PtraceEvent(tid, _, event) if event == Event::PTRACE_EVENT_CLONE as i32 => {
                    self.stopped.insert(tid);
                    waiting.remove(&tid);
                    quiet.push(tid);
                    if let Some(new_tid) = self.register_clone(tid) {
                        let new_tid = Pid::from_raw(new_tid as i32);
                        if self.fresh_threads.contains(&new_tid) {
                            waiting.insert(new_tid);
                        }
                    }
                }
                WaitStatus::PtraceEvent(_, _, event) if event == Event::PTRACE_EVENT_EXEC as i32 => {
                    // Every other thread is gone once exec completes
                    self.pending.push_back(status);
                    waiting.clear();
                }
                WaitStatus::Stopped(tid, _)
                | WaitStatus::PtraceEvent(tid, _, _)
                | WaitStatus::PtraceSyscall(tid) => {
                    self.stopped.insert(tid);
                    waiting.remove(&tid);
                    self.pending.push_back(status);
                }
                WaitStatus::Exited(tid, _) | WaitStatus::Signaled(tid, _, _) => {
                    self.forget_thread(tid);
                    waiting.remove(&tid);
                    self.pending.push_back(status);
                }
                WaitStatus::Continued(_) | WaitStatus::StillAlive => {}
            }
        }

        log::trace!("Stopped {} threads", quiet.len());
        Ok(quiet)
    }

    /// Resume threads returned by `stop_threads`
    fn release_threads(&mut self, quiet: Vec<Pid>) -> Result<(), DebugError> {
        for tid in quiet {
            if self.stopped.contains(&tid) {
                self.resume(tid.as_raw() as u32, None)?;
            }
        }
        Ok(())
    }

    /// Execute the original instruction under a trap and put the trap back.
    ///
    /// All other threads are held for the duration. The stepped thread stays
    /// stopped afterwards.
    pub fn step_over_trap(&mut self, tid: u32, address: u64) -> Result<StepOutcome, DebugError> {
        let original = self
            .traps
            .get(&address)
            .cloned()
            .ok_or_else(|| DebugError::BreakpointError {
                address,
                reason: "no trap at this address".into(),
            })?;
        let pid = Pid::from_raw(tid as i32);

        let quiet = self.stop_threads(Some(pid))?;

        self.write_bytes(address, &original)?;
        regs::set_pc(pid, address).map_err(|e| DebugError::Registers {
            tid,
            reason: e.to_string(),
        })?;
        self.at_trap.remove(&pid);

        let outcome = self.single_step(pid);
        if !matches!(outcome, Ok(StepOutcome::Exited(_))) || self.threads.contains(&self.pid) {
            self.write_bytes(address, self.arch.trap_instruction())?;
        }

        self.release_threads(quiet)?;
        outcome
    }

    fn single_step(&mut self, tid: Pid) -> Result<StepOutcome, DebugError> {
        let step_err = |e: Errno| DebugError::EventError(format!("single-step {}: {}", tid, e));
        let mut owed = None;

        ptrace::step(tid, None).map_err(step_err)?;
        loop {
            match waitpid(tid, Some(WaitPidFlag::__WALL)) {
                Ok(WaitStatus::Stopped(_, Signal::SIGTRAP)) => {
                    return Ok(StepOutcome::Stepped { signal: owed })
                }
                Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) if self.stopping.remove(&tid) => {
                    ptrace::step(tid, None).map_err(step_err)?;
                }
                Ok(WaitStatus::Stopped(_, sig)) => {
                    // Signal stop before the instruction ran; owe it and step again
                    owed = Some(sig);
                    ptrace::step(tid, None).map_err(step_err)?;
                }
                Ok(WaitStatus::PtraceEvent(_, _, event)) => {
                    if event == Event::PTRACE_EVENT_CLONE as i32 {
                        self.register_clone(tid);
                    }
                    ptrace::step(tid, None).map_err(step_err)?;
                }
                Ok(WaitStatus::Exited(_, exit_code)) => {
                    self.forget_thread(tid);
                    return Ok(StepOutcome::Exited(if tid == self.pid {
                        DebugEvent::ProcessExited { exit_code }
                    } else {
                        DebugEvent::ThreadExited {
                            tid: tid.as_raw() as u32,
                        }
                    }));
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    self.forget_thread(tid);
                    return Ok(StepOutcome::Exited(if tid == self.pid {
                        DebugEvent::ProcessSignaled { signal: sig as i32 }
                    } else {
                        DebugEvent::ThreadExited {
                            tid: tid.as_raw() as u32,
                        }
                    }));
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(step_err(e)),
            }
        }
    }

    /// Remove every trap and release all threads.
    ///
    /// Every thread is stopped first so none of them executes a
    /// half-restored instruction; a thread caught on a trap gets its pc
    /// rewound to the original instruction.
    pub fn detach(&mut self) -> Result<(), DebugError> {
        let pid = self.pid();
        log::info!("Detaching from process {}", pid);

        self.stop_threads(None)?;

        // Settle what the threads reported on their way into the stop
        let mut owed: HashMap<Pid, Signal> = HashMap::new();
        let pending: Vec<WaitStatus> = self.pending.drain(..).collect();
        for status in pending {
            match status {
                WaitStatus::Stopped(tid, Signal::SIGTRAP) => {
                    if let Ok(regs) = regs::read(tid) {
                        let address = self.arch.trap_address(regs.pc());
                        if self.has_trap(address) {
                            self.at_trap.insert(tid, address);
                        }
                    }
                }
                WaitStatus::Stopped(_, Signal::SIGSTOP) => {}
                WaitStatus::Stopped(tid, sig) => {
                    owed.insert(tid, sig);
                }
                WaitStatus::Exited(tid, _) | WaitStatus::Signaled(tid, _, _) => {
                    self.forget_thread(tid);
                }
                _ => {}
            }
        }

        let trapped: Vec<(Pid, u64)> = self.at_trap.drain().collect();
        for (tid, address) in trapped {
            if let Err(e) = regs::set_pc(tid, address) {
                log::warn!("Cannot rewind thread {}: {}", tid, e);
            }
        }

        let addresses: Vec<u64> = self.traps.keys().copied().collect();
        for address in addresses {
            if let Err(e) = self.remove_trap(address) {
                log::warn!("{}", e);
            }
        }

        for tid in &self.threads {
            match ptrace::detach(*tid, owed.get(tid).copied()) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => {
                    return Err(DebugError::DetachFailed {
                        pid,
                        reason: e.to_string(),
                    })
                }
            }
        }
        self.threads.clear();
        self.stopped.clear();
        self.fresh_threads.clear();

        // A SIGCONT discards SIGSTOPs still queued for threads that stopped
        // for another reason first
        if !self.stopping.is_empty() {
            let _ = signal::kill(self.pid, Signal::SIGCONT);
            self.stopping.clear();
        }

        log::info!("Successfully detached from process {}", pid);
        Ok(())
    }

    /// Kill the debuggee and reap it
    pub fn kill(&mut self) -> Result<(), DebugError> {
        log::info!("Killing process {}", self.pid);
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| DebugError::EventError(format!("kill {}: {}", self.pid, e)))?;

        // The leader's exit is only reported after every other traced
        // thread has been reaped
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
                Ok(WaitStatus::Exited(tid, _)) | Ok(WaitStatus::Signaled(tid, _, _))
                    if tid == self.pid =>
                {
                    break
                }
                Ok(WaitStatus::Exited(tid, _)) | Ok(WaitStatus::Signaled(tid, _, _)) => {
                    log::trace!("Reaped thread {}", tid);
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(Errno::ECHILD) => break,
                Err(e) => return Err(DebugError::EventError(format!("reap {}: {}", self.pid, e))),
            }
        }
        self.threads.clear();
        self.fresh_threads.clear();
        self.stopped.clear();
        self.stopping.clear();
        self.at_trap.clear();
        self.pending.clear();
        self.traps.clear();
        Ok(())
    }
}

/// Thread ids of a process from `/proc/<pid>/task`
fn list_tasks(pid: u32) -> std::io::Result<Vec<Pid>> {
    let mut tids: Vec<Pid> = fs::read_dir(format!("/proc/{}/task", pid))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .map(Pid::from_raw)
        .collect();
    tids.sort();
    Ok(tids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_own_tasks() {
        let tids = list_tasks(std::process::id()).unwrap();
        assert!(tids.contains(&Pid::from_raw(std::process::id() as i32)));
    }

    #[test]
    fn test_list_tasks_of_missing_process() {
        assert!(list_tasks(u32::MAX).is_err());
    }

    #[test]
    fn test_launch_missing_program() {
        let result = LinuxProcess::launch("/nonexistent/rxpage-helper-test", &[]);
        assert!(matches!(result, Err(DebugError::LaunchFailed { .. })));
    }

    #[test]
    fn test_tgkill_missing_thread() {
        let me = Pid::from_raw(std::process::id() as i32);
        assert_eq!(
            tgkill(me, Pid::from_raw(i32::MAX), Signal::SIGCONT),
            Err(Errno::ESRCH)
        );
    }
}
