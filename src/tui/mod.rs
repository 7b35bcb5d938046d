//! TUI debugger.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register, PC and flag view
//! - TLB contents and hit/miss counters
//! - Physical memory view
//! - Step/run/breakpoint controls
//! - Disassembly view

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
