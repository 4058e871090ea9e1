//! Program loading and disassembly.
//!
//! This module provides:
//! - A loader for the text program description format
//! - A disassembler (memory image → readable text)

pub mod disasm;
pub mod program;

pub use disasm::disassemble;
pub use program::{Program, ProgramError, load_program, parse_program};
