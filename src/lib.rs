//! # Dual-Mode CPU Emulator
//!
//! A small single-CPU machine with two privilege levels, timer-driven
//! preemption and stack-based context switching.
//!
//! The CPU never owns memory. It reaches a 2000-cell address space through a
//! [`MemoryPort`], which can be an in-process [`Memory`], a memory service on
//! another thread ([`link::ChannelPort`]) or one in another process speaking a
//! line protocol ([`link::LinkPort`]). User code is confined to addresses
//! below 1000; only kernel mode may touch the rest.

pub mod asm;
pub mod config;
pub mod cpu;
pub mod link;

#[cfg(feature = "tui")]
pub mod tui;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use cpu::{
    Cpu, CpuError, CpuState, Executed, Memory, MemoryPort, Mode, Opcode, PortError, Registers,
};
pub use asm::{disassemble, load_program, parse_program, Program, ProgramError};
pub use link::{ChannelPort, LinkPort, MemoryService};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
