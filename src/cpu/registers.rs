//! CPU registers and privilege mode.
//!
//! The register file holds six 32-bit signed registers:
//! - PC: address of the next instruction word
//! - SP: stack pointer, grows downward (pre-decrement push, post-increment pop)
//! - IR: last opcode or operand word fetched
//! - AC: accumulator
//! - X, Y: general registers, also used for indexed loads

use crate::cpu::decode::USER_STACK_TOP;
use serde::{Serialize, Deserialize};

/// Privilege level of the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Restricted to the user region of memory.
    #[default]
    User,
    /// Full access to the address space.
    Kernel,
}

impl Mode {
    pub fn is_kernel(self) -> bool {
        self == Mode::Kernel
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::User => f.write_str("user"),
            Mode::Kernel => f.write_str("kernel"),
        }
    }
}

/// The register file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub pc: i32,
    pub sp: i32,
    pub ir: i32,
    pub ac: i32,
    pub x: i32,
    pub y: i32,
}

impl Registers {
    /// Create a register file in its power-on state.
    ///
    /// Everything is zero except SP, which starts at the top of the user stack.
    pub fn new() -> Self {
        Self {
            pc: 0,
            sp: USER_STACK_TOP,
            ir: 0,
            ac: 0,
            x: 0,
            y: 0,
        }
    }

    /// Reset all registers to their power-on state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Increment the program counter by 1.
    /// Returns the old value.
    pub fn advance_pc(&mut self) -> i32 {
        let old = self.pc;
        self.pc = self.pc.wrapping_add(1);
        old
    }

    /// Set the program counter to an absolute address.
    pub fn jump(&mut self, addr: i32) {
        self.pc = addr;
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PC={} SP={} IR={} AC={} X={} Y={}",
            self.pc, self.sp, self.ir, self.ac, self.x, self.y
        )
    }
}
