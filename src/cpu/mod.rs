//! CPU emulation.
//!
//! This module implements the complete machine as seen by a program:
//! - 2000 integer memory cells, split into a user half and a kernel half
//! - 6 registers: PC, SP, IR, AC, X, Y
//! - 31-opcode instruction set with optional single-word operands
//! - user/kernel privilege, an instruction-counting timer and system calls

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;
pub mod random;

pub use memory::{Memory, MemoryError, MemoryPort, PortError};
pub use registers::{Mode, Registers};
pub use decode::{Opcode, DecodeError};
pub use execute::{Cpu, CpuError, CpuState, Executed, Interrupt, Snapshot};
pub use random::XorShift;
