//! RX pages - Marks freshly mapped executable pages for a JIT engine
//!
//! A JIT engine that maps code pages read+execute calls
//! `NOTIFY_DEBUGGER_ABOUT_RX_PAGES(base, len)` so that an attached debugger
//! can take note. The engine then checks the start of the page for a marker:
//! if the debugger serviced the breakpoint, the marker is there. A missing
//! marker tells the engine the breakpoint is not wired up.
//!
//! `init_module` installs the breakpoint on the session's dummy target;
//! `handle_new_rx_page` services each hit.

use colored::Colorize;
use thiserror::Error;

use crate::core::breakpoint::{BreakpointId, BreakpointLocation, CallbackArgs};
use crate::core::debugger::{DebugError, Debugger};
use crate::core::memory::MemoryError;
use crate::debug::arch::Arch;
use crate::debug::Frame;

/// Symbol the JIT engine calls after mapping RX pages
pub const DEFAULT_SYMBOL_PATTERN: &str = "^NOTIFY_DEBUGGER_ABOUT_RX_PAGES$";

/// Text written at the start of the page
pub const DEFAULT_MARKER_TEXT: &str = "IHELPED!";

/// `DEFAULT_MARKER_TEXT` as bytes
pub const DEFAULT_MARKER: &[u8] = DEFAULT_MARKER_TEXT.as_bytes();

/// Name the handler is registered and bound under
pub const HANDLER_NAME: &str = concat!(module_path!(), "::handle_new_rx_page");

const ARG_MARKER: &str = "marker";
const ARG_BASE_REGISTER: &str = "base_register";
const ARG_LEN_REGISTER: &str = "len_register";

/// Why a hit did not leave the marker in the page
#[derive(Error, Debug)]
pub enum RxPageError {
    #[error("Failed to read registers {base_register}/{len_register}")]
    RegistersUnavailable {
        base_register: String,
        len_register: String,
    },

    #[error("Invalid base/page_len: base={base}, page_len={page_len}")]
    InvalidRegion { base: u64, page_len: u64 },

    #[error("Failed to write into {base:#x}[+{page_len}] {source}")]
    WriteFailed {
        base: u64,
        page_len: u64,
        #[source]
        source: MemoryError,
    },

    #[error("Failed to write into {base:#x}[+{page_len}] (wrote {written} of {expected} bytes)")]
    ShortWrite {
        base: u64,
        page_len: u64,
        written: usize,
        expected: usize,
    },
}

/// What the helper matches and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPageConfig {
    /// Regular expression selecting the notification symbol
    pub symbol_pattern: String,
    /// Bytes written at the page base
    pub marker: Vec<u8>,
    /// Register holding the page base
    pub base_register: String,
    /// Register holding the page length
    pub len_register: String,
}

impl Default for RxPageConfig {
    fn default() -> Self {
        let (base_register, len_register) = Arch::host().argument_registers();
        Self {
            symbol_pattern: DEFAULT_SYMBOL_PATTERN.to_string(),
            marker: DEFAULT_MARKER.to_vec(),
            base_register: base_register.to_string(),
            len_register: len_register.to_string(),
        }
    }
}

impl RxPageConfig {
    /// Encode as breakpoint callback arguments
    pub fn to_args(&self) -> CallbackArgs {
        CallbackArgs::from([
            (ARG_MARKER.to_string(), hex::encode(&self.marker)),
            (ARG_BASE_REGISTER.to_string(), self.base_register.clone()),
            (ARG_LEN_REGISTER.to_string(), self.len_register.clone()),
        ])
    }

    /// Decode from breakpoint callback arguments; missing or malformed
    /// entries fall back to the defaults
    pub fn from_args(args: &CallbackArgs) -> Self {
        let mut config = Self::default();
        if let Some(marker) = args.get(ARG_MARKER).and_then(|m| hex::decode(m).ok()) {
            if !marker.is_empty() {
                config.marker = marker;
            }
        }
        if let Some(reg) = args.get(ARG_BASE_REGISTER) {
            config.base_register = reg.clone();
        }
        if let Some(reg) = args.get(ARG_LEN_REGISTER) {
            config.len_register = reg.clone();
        }
        config
    }
}

/// Write the marker into the page described by the frame's argument
/// registers. Returns the number of bytes written.
pub fn mark_rx_page(frame: &mut dyn Frame, config: &RxPageConfig) -> Result<usize, RxPageError> {
    let read = |name: &str| {
        frame
            .find_register(name)
            .filter(|reg| reg.is_valid())
            .and_then(|reg| reg.value_as_unsigned())
    };
    let (base, page_len) = match (read(&config.base_register), read(&config.len_register)) {
        (Some(base), Some(page_len)) => (base, page_len),
        _ => {
            return Err(RxPageError::RegistersUnavailable {
                base_register: config.base_register.clone(),
                len_register: config.len_register.clone(),
            })
        }
    };

    if base == 0 || page_len == 0 {
        return Err(RxPageError::InvalidRegion { base, page_len });
    }

    let write_len = config.marker.len().min(page_len.try_into().unwrap_or(usize::MAX));
    let prefix = &config.marker[..write_len];

    let written = frame
        .process()
        .write_memory(base, prefix)
        .map_err(|source| RxPageError::WriteFailed {
            base,
            page_len,
            source,
        })?;
    if written != write_len {
        return Err(RxPageError::ShortWrite {
            base,
            page_len,
            written,
            expected: write_len,
        });
    }

    log::debug!(
        "Marked RX page {:#x}[+{}] with {}",
        base,
        page_len,
        hex::encode(prefix)
    );
    Ok(written)
}

/// Breakpoint callback for the RX page notification.
///
/// Never fails: every problem is logged and the debuggee carries on; the
/// engine notices the missing marker on its own.
pub fn handle_new_rx_page(frame: &mut dyn Frame, _location: &BreakpointLocation, args: &CallbackArgs) {
    let config = RxPageConfig::from_args(args);
    if let Err(e) = mark_rx_page(frame, &config) {
        match e {
            RxPageError::WriteFailed { .. } | RxPageError::ShortWrite { .. } => log::error!("{}", e),
            _ => log::warn!("{}", e),
        }
    }
}

/// Install the RX page breakpoint with the default configuration
pub fn init_module(debugger: &mut Debugger) -> Result<BreakpointId, DebugError> {
    init_module_with(debugger, &RxPageConfig::default())
}

/// Install the RX page breakpoint on the debugger's dummy target so every
/// process debugged in this session inherits it.
pub fn init_module_with(
    debugger: &mut Debugger,
    config: &RxPageConfig,
) -> Result<BreakpointId, DebugError> {
    debugger
        .callbacks_mut()
        .register(HANDLER_NAME, handle_new_rx_page);

    let target = debugger.dummy_target_mut();
    let id = target.breakpoint_create_by_regex(&config.symbol_pattern)?;
    let bp = target
        .breakpoint_mut(id)
        .ok_or_else(|| DebugError::EventError(format!("breakpoint {} vanished", id)))?;
    bp.set_script_callback_function(HANDLER_NAME);
    bp.set_callback_args(config.to_args());
    bp.set_auto_continue(true);

    println!("{}", "-- debugger integration loaded --".green());
    log::info!(
        "RX page breakpoint {} on /{}/ ({}, {})",
        id,
        config.symbol_pattern,
        config.base_register,
        config.len_register
    );
    Ok(id)
}
