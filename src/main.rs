//! rxpage-helper - Runs a JIT engine under ptrace and services its RX page
//! notifications
//!
//! Launches a program (or attaches to a PID), installs the
//! `NOTIFY_DEBUGGER_ABOUT_RX_PAGES` breakpoint and keeps the debuggee running
//! until it exits or the operator interrupts.

use anyhow::Context;
use clap::Parser;

use rxpage_helper::core::Debugger;
use rxpage_helper::rx_pages::{self, RxPageConfig};

/// rxpage-helper: marks JIT-mapped RX pages for the engine's self check
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Attach to a running process instead of launching one
    #[arg(short, long, conflicts_with = "program")]
    pid: Option<u32>,

    /// Regular expression selecting the notification symbol
    #[arg(long, default_value = rx_pages::DEFAULT_SYMBOL_PATTERN)]
    symbol: String,

    /// Marker written at the page base
    #[arg(long, default_value = rx_pages::DEFAULT_MARKER_TEXT)]
    marker: String,

    /// Register holding the page base (defaults to the first argument register)
    #[arg(long)]
    base_register: Option<String>,

    /// Register holding the page length (defaults to the second argument register)
    #[arg(long)]
    len_register: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Program to launch, followed by its arguments
    #[arg(trailing_var_arg = true, required_unless_present = "pid")]
    program: Vec<String>,
}

impl Args {
    fn rx_page_config(&self) -> anyhow::Result<RxPageConfig> {
        if self.marker.is_empty() {
            anyhow::bail!("Marker must not be empty");
        }
        let mut config = RxPageConfig {
            symbol_pattern: self.symbol.clone(),
            marker: self.marker.as_bytes().to_vec(),
            ..RxPageConfig::default()
        };
        if let Some(reg) = &self.base_register {
            config.base_register = reg.clone();
        }
        if let Some(reg) = &self.len_register {
            config.len_register = reg.clone();
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    // 1. Parse command line arguments
    let args = Args::parse();

    // 2. Initialize logger with verbosity level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    log::debug!("Arguments: {:?}", args);

    // 3. Install the breakpoint before any process exists
    let mut debugger = Debugger::new();
    let config = args.rx_page_config()?;
    rx_pages::init_module_with(&mut debugger, &config)
        .context("Failed to install RX page breakpoint")?;

    run(&mut debugger, &args)
}

#[cfg(target_os = "linux")]
fn run(debugger: &mut Debugger, args: &Args) -> anyhow::Result<()> {
    use rxpage_helper::debug::linux::install_interrupt_handler;
    use rxpage_helper::debug::types::DebugEvent;

    install_interrupt_handler()?;

    // 4. Start the debuggee
    match args.pid {
        Some(pid) => {
            debugger.attach(pid)?;
            println!("[*] Attached to process {}", pid);
        }
        None => {
            let (program, program_args) = args
                .program
                .split_first()
                .context("No program given")?;
            debugger.launch(program, program_args)?;
            println!(
                "[*] Launched {} (pid {})",
                program,
                debugger.pid().unwrap_or_default()
            );
        }
    }

    // 5. Event loop
    loop {
        match debugger.run()? {
            DebugEvent::BreakpointHit { address, tid } => {
                println!("[*] Thread {} stopped at {:#x}; continuing", tid, address);
            }
            DebugEvent::ProcessExited { exit_code } => {
                println!("[*] Process exited with code {}", exit_code);
                return Ok(());
            }
            DebugEvent::ProcessSignaled { signal } => {
                println!("[*] Process terminated by signal {}", signal);
                return Ok(());
            }
            DebugEvent::Interrupted => {
                if debugger.is_launched() {
                    println!("[*] Interrupted; killing debuggee");
                    debugger.kill()?;
                } else {
                    println!("[*] Interrupted; detaching");
                    debugger.detach()?;
                }
                return Ok(());
            }
            other => log::debug!("Event: {:?}", other),
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn run(_debugger: &mut Debugger, _args: &Args) -> anyhow::Result<()> {
    anyhow::bail!("Process debugging is only supported on Linux")
}
