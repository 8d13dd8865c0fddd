//! Drives the real ptrace backend against the `jit-demo` engine.
//!
//! Sessions reap with `waitpid(-1)`, so only one may be live per test
//! process at a time.
#![cfg(target_os = "linux")]

use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rxpage_helper::core::Debugger;
use rxpage_helper::debug::types::{DebugEvent, DebugStatus};
use rxpage_helper::rx_pages;

const JIT_DEMO: &str = env!("CARGO_BIN_EXE_jit-demo");

static SESSION_LOCK: Mutex<()> = Mutex::new(());

fn exclusive_session() -> MutexGuard<'static, ()> {
    SESSION_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn helper() -> (Debugger, rxpage_helper::core::BreakpointId) {
    let mut debugger = Debugger::new();
    let id = rx_pages::init_module(&mut debugger).unwrap();
    (debugger, id)
}

/// Run until the debuggee is gone; returns its exit code
fn run_to_exit(debugger: &mut Debugger) -> i32 {
    loop {
        match debugger.run().unwrap() {
            DebugEvent::ProcessExited { exit_code } => return exit_code,
            DebugEvent::ProcessSignaled { signal } => panic!("debuggee killed by signal {}", signal),
            DebugEvent::Interrupted => panic!("unexpected interrupt"),
            _ => {}
        }
    }
}

fn proc_status_field(pid: u32, field: &str) -> Option<String> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix(field)?.strip_prefix(':'))
        .map(|value| value.trim().to_string())
}

#[test]
fn launched_engine_gets_every_page_marked() {
    let _guard = exclusive_session();
    let (mut debugger, id) = helper();

    debugger
        .launch(JIT_DEMO, &args(&["--threads", "1", "--pages", "50"]))
        .unwrap();
    assert_eq!(run_to_exit(&mut debugger), 0);

    let target = debugger.target().unwrap();
    assert_eq!(target.breakpoint(id).unwrap().hit_count(), 50);
    debugger.kill().unwrap();
}

#[test]
fn multithreaded_engine_misses_no_notification() {
    let _guard = exclusive_session();
    let (mut debugger, id) = helper();

    debugger
        .launch(JIT_DEMO, &args(&["--threads", "4", "--pages", "100"]))
        .unwrap();
    assert_eq!(run_to_exit(&mut debugger), 0);
    assert_eq!(
        debugger.target().unwrap().breakpoint(id).unwrap().hit_count(),
        400
    );
    debugger.kill().unwrap();
}

#[test]
fn kill_reaps_multithreaded_debuggee() {
    let _guard = exclusive_session();
    let (mut debugger, _) = helper();

    debugger
        .launch(
            JIT_DEMO,
            &args(&["--threads", "4", "--pages", "0", "--linger-ms", "30000"]),
        )
        .unwrap();
    let pid = debugger.pid().unwrap();
    std::thread::sleep(Duration::from_millis(200));

    debugger.kill().unwrap();
    assert_eq!(debugger.status(), DebugStatus::Detached);
    assert!(std::fs::metadata(format!("/proc/{}", pid)).is_err());
}

#[test]
fn interrupt_then_kill() {
    let _guard = exclusive_session();
    let (mut debugger, _) = helper();
    rxpage_helper::debug::linux::install_interrupt_handler().unwrap();

    debugger
        .launch(
            JIT_DEMO,
            &args(&["--threads", "2", "--pages", "10", "--linger-ms", "30000"]),
        )
        .unwrap();
    nix::sys::signal::raise(nix::sys::signal::Signal::SIGINT).unwrap();

    assert!(matches!(debugger.run().unwrap(), DebugEvent::Interrupted));
    debugger.kill().unwrap();
}

#[test]
fn detach_leaves_attached_engine_running() {
    let _guard = exclusive_session();
    let mut child = Command::new(JIT_DEMO)
        .args(["--threads", "4", "--pages", "0", "--linger-ms", "30000"])
        .spawn()
        .unwrap();
    let pid = child.id();
    std::thread::sleep(Duration::from_millis(300));

    let (mut debugger, _) = helper();
    debugger.attach(pid).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    debugger.detach().unwrap();
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(proc_status_field(pid, "TracerPid").as_deref(), Some("0"));
    let state = proc_status_field(pid, "State").unwrap();
    assert!(!state.starts_with('t') && !state.starts_with('T'), "state: {}", state);

    child.kill().unwrap();
    child.wait().unwrap();
}
