//! rxpage-helper - Debugger integration for JIT engines
//!
//! Services `NOTIFY_DEBUGGER_ABOUT_RX_PAGES` breakpoints: every time the
//! debuggee reports a fresh read+execute mapping, a short marker is written
//! at the start of the page and the debuggee continues.

pub mod core;
pub mod debug;
pub mod loader;
pub mod rx_pages;
