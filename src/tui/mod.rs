//! TUI debugger.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register, mode and timer display
//! - Memory view over user and system space
//! - Step/run/breakpoint controls
//! - Disassembly view and captured program output

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
