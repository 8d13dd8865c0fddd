//! Core module - Debugger session, breakpoints and memory access
//!
//! This module contains the target/breakpoint model, the callback registry
//! and the process memory utilities the backends build on.

pub mod breakpoint;
pub mod callbacks;
pub mod debugger;
pub mod memory;
pub mod target;

// Re-export common types
pub use breakpoint::{Breakpoint, BreakpointId, CallbackArgs, SymbolMatcher};
pub use debugger::{DebugError, Debugger};
