//! Debugger - Session over one debuggee
//!
//! Owns the dummy target, the callback registry and (on Linux) the live
//! ptrace session. Breakpoints made on the dummy target before a process
//! exists are carried over to the process when it is launched or attached,
//! and resolved again whenever new shared objects appear.

use thiserror::Error;

use crate::core::callbacks::CallbackRegistry;
use crate::core::memory::MemoryError;
use crate::core::target::Target;
use crate::debug::types::{DebugEvent, DebugStatus};

/// Debugger-specific errors
#[derive(Error, Debug)]
pub enum DebugError {
    #[error("Failed to attach to process {pid}: {reason}")]
    AttachFailed { pid: u32, reason: String },

    #[error("Failed to detach from process {pid}: {reason}")]
    DetachFailed { pid: u32, reason: String },

    #[error("Failed to launch {program}: {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("No process attached")]
    NoProcess,

    #[error("Breakpoint error at {address:#x}: {reason}")]
    BreakpointError { address: u64, reason: String },

    #[error("Invalid breakpoint pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to read registers of thread {tid}: {reason}")]
    Registers { tid: u32, reason: String },

    #[error("Debug event error: {0}")]
    EventError(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("Process debugging is not supported on this platform")]
    Unsupported,
}

/// Dynamic linker hook called after every library load/unload
#[cfg(target_os = "linux")]
const RENDEZVOUS_SYMBOL: &str = "_dl_debug_state";

/// Main debugger interface
pub struct Debugger {
    /// Template for every process this session will debug
    dummy_target: Target,

    /// Callbacks bound to breakpoints by name
    callbacks: CallbackRegistry,

    status: DebugStatus,

    #[cfg(target_os = "linux")]
    session: Option<linux::Session>,
}

impl Debugger {
    /// Create a new debugger instance
    pub fn new() -> Self {
        Self {
            dummy_target: Target::dummy(),
            callbacks: CallbackRegistry::new(),
            status: DebugStatus::Detached,
            #[cfg(target_os = "linux")]
            session: None,
        }
    }

    /// Target whose breakpoints apply to every future process
    pub fn dummy_target(&self) -> &Target {
        &self.dummy_target
    }

    pub fn dummy_target_mut(&mut self) -> &mut Target {
        &mut self.dummy_target
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry {
        &mut self.callbacks
    }

    pub fn status(&self) -> DebugStatus {
        self.status
    }

    /// Fresh concrete target inheriting the dummy target's breakpoints
    pub fn create_target(&self) -> Target {
        Target::inherit(&self.dummy_target)
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use nix::sys::signal::Signal;

    use super::*;
    use crate::core::target::HitOutcome;
    use crate::debug::linux::{LinuxProcess, StepOutcome};
    use crate::loader::ModuleMap;

    /// Live state of a debugged process
    pub(super) struct Session {
        pub(super) process: LinuxProcess,
        pub(super) target: Target,
        modules: ModuleMap,
        /// Trap on the dynamic linker's load hook
        rendezvous: Option<u64>,
        /// Thread held at a breakpoint that does not auto-continue
        held: Option<(u32, u64)>,
    }

    impl Session {
        pub(super) fn new(process: LinuxProcess, target: Target) -> Self {
            Self {
                process,
                target,
                modules: ModuleMap::new(),
                rendezvous: None,
                held: None,
            }
        }

        /// Load new modules, resolve pending breakpoints and arm the
        /// library-load hook
        pub(super) fn refresh_modules(&mut self) -> Result<(), DebugError> {
            let regions = self.process.memory().query_regions()?;
            for index in self.modules.refresh(&regions) {
                if let Some(module) = self.modules.get(index) {
                    log::info!("Module loaded: {} @ {:#x}", module.path, module.base_address);
                }
            }

            for address in self.target.resolve_locations(self.modules.symbols()) {
                if let Err(e) = self.process.insert_trap(address) {
                    log::warn!("{}", e);
                }
            }

            if self.rendezvous.is_none() {
                if let Some(address) = self.modules.find_symbol(RENDEZVOUS_SYMBOL).map(|s| s.address) {
                    match self.process.insert_trap(address) {
                        Ok(()) => {
                            log::debug!("Shared library hook armed at {:#x}", address);
                            self.rendezvous = Some(address);
                        }
                        Err(e) => log::warn!("Cannot arm shared library hook: {}", e),
                    }
                }
            }
            Ok(())
        }

        /// Step `tid` over the trap at `address` and let it run. Returns the
        /// terminal event if the process died meanwhile.
        pub(super) fn continue_from_trap(
            &mut self,
            tid: u32,
            address: u64,
        ) -> Result<Option<DebugEvent>, DebugError> {
            match self.process.step_over_trap(tid, address)? {
                StepOutcome::Stepped { signal } => {
                    self.process.resume(tid, signal)?;
                    Ok(None)
                }
                StepOutcome::Exited(event) if event.is_terminal() => Ok(Some(event)),
                StepOutcome::Exited(_) => Ok(None),
            }
        }

        fn reload_image(&mut self) -> Result<(), DebugError> {
            self.modules.clear();
            self.rendezvous = None;
            self.target.clear_locations();
            self.refresh_modules()
        }
    }

    impl Debugger {
        /// Launch a program under the debugger
        pub fn launch(&mut self, program: &str, args: &[String]) -> Result<(), DebugError> {
            let process = LinuxProcess::launch(program, args)?;
            self.start_session(process)
        }

        /// Attach to an existing process by PID
        pub fn attach(&mut self, pid: u32) -> Result<(), DebugError> {
            log::info!("Attaching to process {}", pid);
            let process = LinuxProcess::attach(pid)?;
            self.start_session(process)
        }

        fn start_session(&mut self, process: LinuxProcess) -> Result<(), DebugError> {
            let mut session = Session::new(process, self.create_target());
            session.refresh_modules()?;
            session.process.resume_all()?;
            self.session = Some(session);
            self.status = DebugStatus::Running;
            Ok(())
        }

        /// Concrete target of the live process
        pub fn target(&self) -> Option<&Target> {
            self.session.as_ref().map(|s| &s.target)
        }

        pub fn pid(&self) -> Option<u32> {
            self.session.as_ref().map(|s| s.process.pid())
        }

        /// Whether the debuggee was started by us (rather than attached)
        pub fn is_launched(&self) -> bool {
            self.session
                .as_ref()
                .map_or(false, |s| s.process.is_launched())
        }

        /// Drive the debuggee until something needs the caller.
        ///
        /// Auto-continue breakpoints, library loads, exec and debuggee
        /// signals are handled here. Returns on a breakpoint that does not
        /// auto-continue (the thread stays held until the next `run`), on
        /// process exit, and on operator interrupt.
        pub fn run(&mut self) -> Result<DebugEvent, DebugError> {
            if self.status == DebugStatus::Terminated {
                return Err(DebugError::EventError("process has terminated".into()));
            }
            let session = self.session.as_mut().ok_or(DebugError::NoProcess)?;

            if let Some((tid, address)) = session.held.take() {
                if let Some(end) = session.continue_from_trap(tid, address)? {
                    self.status = DebugStatus::Terminated;
                    return Ok(end);
                }
            }
            self.status = DebugStatus::Running;

            loop {
                let event = session.process.wait_event()?;
                match event {
                    DebugEvent::BreakpointHit { address, tid } => {
                        if session.rendezvous == Some(address) {
                            if let Err(e) = session.refresh_modules() {
                                log::warn!("Module rescan failed: {}", e);
                            }
                        }

                        let outcome = {
                            let mut frame = session.process.frame(tid, address);
                            session.target.handle_hit(address, &mut frame, &self.callbacks)
                        };

                        if let Some(HitOutcome {
                            auto_continue: false,
                            breakpoint_ids,
                        }) = outcome
                        {
                            log::info!(
                                "Thread {} stopped at {:#x} (breakpoints {:?})",
                                tid,
                                address,
                                breakpoint_ids
                            );
                            session.held = Some((tid, address));
                            self.status = DebugStatus::Suspended;
                            return Ok(event);
                        }

                        if let Some(end) = session.continue_from_trap(tid, address)? {
                            self.status = DebugStatus::Terminated;
                            return Ok(end);
                        }
                    }
                    DebugEvent::Signal { tid, signal } => {
                        let signal = Signal::try_from(signal).ok();
                        log::debug!("Thread {} received {:?}; passing it on", tid, signal);
                        session.process.resume(tid, signal)?;
                    }
                    DebugEvent::Exec { tid } => {
                        log::info!("Process image replaced by exec; re-resolving breakpoints");
                        session.reload_image()?;
                        session.process.resume(tid, None)?;
                    }
                    DebugEvent::ThreadCreated { tid } => log::debug!("Thread {} created", tid),
                    DebugEvent::ThreadExited { tid } => log::debug!("Thread {} exited", tid),
                    DebugEvent::ProcessExited { .. } | DebugEvent::ProcessSignaled { .. } => {
                        self.status = DebugStatus::Terminated;
                        return Ok(event);
                    }
                    DebugEvent::Interrupted => return Ok(event),
                }
            }
        }

        /// Remove all traps and let the debuggee run on its own
        pub fn detach(&mut self) -> Result<(), DebugError> {
            let mut session = self.session.take().ok_or(DebugError::NoProcess)?;
            if self.status != DebugStatus::Terminated {
                session.process.detach()?;
            }
            self.status = DebugStatus::Detached;
            Ok(())
        }

        /// Terminate a debuggee
        pub fn kill(&mut self) -> Result<(), DebugError> {
            let mut session = self.session.take().ok_or(DebugError::NoProcess)?;
            if self.status != DebugStatus::Terminated {
                session.process.kill()?;
            }
            self.status = DebugStatus::Detached;
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl Debugger {
    pub fn launch(&mut self, _program: &str, _args: &[String]) -> Result<(), DebugError> {
        Err(DebugError::Unsupported)
    }

    pub fn attach(&mut self, _pid: u32) -> Result<(), DebugError> {
        Err(DebugError::Unsupported)
    }

    pub fn target(&self) -> Option<&Target> {
        None
    }

    pub fn pid(&self) -> Option<u32> {
        None
    }

    pub fn is_launched(&self) -> bool {
        false
    }

    pub fn run(&mut self) -> Result<DebugEvent, DebugError> {
        Err(DebugError::NoProcess)
    }

    pub fn detach(&mut self) -> Result<(), DebugError> {
        Err(DebugError::NoProcess)
    }

    pub fn kill(&mut self) -> Result<(), DebugError> {
        Err(DebugError::NoProcess)
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_detached() {
        let debugger = Debugger::new();
        assert_eq!(debugger.status(), DebugStatus::Detached);
        assert!(debugger.dummy_target().is_dummy());
        assert!(debugger.dummy_target().breakpoints().is_empty());
        assert!(debugger.callbacks().is_empty());
        assert!(debugger.target().is_none());
        assert!(debugger.pid().is_none());
    }

    #[test]
    fn test_run_without_process() {
        let mut debugger = Debugger::new();
        assert!(matches!(debugger.run(), Err(DebugError::NoProcess)));
        assert!(matches!(debugger.detach(), Err(DebugError::NoProcess)));
    }

    #[test]
    fn test_created_target_inherits_dummy() {
        let mut debugger = Debugger::new();
        let id = debugger
            .dummy_target_mut()
            .breakpoint_create_by_regex("^hook$")
            .unwrap();
        debugger
            .dummy_target_mut()
            .breakpoint_mut(id)
            .unwrap()
            .set_auto_continue(true);

        let target = debugger.create_target();
        assert!(!target.is_dummy());
        assert!(target.breakpoint(id).unwrap().auto_continue());
    }

    #[test]
    fn test_invalid_pattern_error_message() {
        let mut debugger = Debugger::new();
        let err = debugger
            .dummy_target_mut()
            .breakpoint_create_by_regex("[")
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid breakpoint pattern '['"));
    }
}
