//! Instruction set for the dual-mode CPU.
//!
//! Every instruction is one integer opcode word, optionally followed by a
//! single operand word. The opcode table below is the only place numeric
//! codes are defined; the engine, the disassembler and the debugger all
//! decode through it.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Total number of cells in the address space.
pub const MEMORY_SIZE: i32 = 2000;

/// First address of the kernel region. User mode may only touch addresses below it.
pub const KERNEL_BOUNDARY: i32 = 1000;

/// Entry point of the timer interrupt handler.
pub const TIMER_VECTOR: i32 = 1000;

/// Entry point of the system call (`INT`) handler.
pub const SYSCALL_VECTOR: i32 = 1500;

/// Initial kernel stack pointer on interrupt entry.
pub const STACK_TOP: i32 = MEMORY_SIZE;

/// Initial user stack pointer.
pub const USER_STACK_TOP: i32 = KERNEL_BOUNDARY;

/// A decoded opcode.
///
/// Grouped the same way programs tend to use them:
/// - Loads and stores
/// - I/O
/// - Arithmetic and register moves
/// - Control flow and stack
/// - Privilege transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // ==================== Loads / Stores ====================

    /// AC := operand
    LoadValue,
    /// AC := [operand]
    LoadAddr,
    /// AC := [[operand]]
    LoadIndAddr,
    /// AC := [operand + X]
    LoadIdxX,
    /// AC := [operand + Y]
    LoadIdxY,
    /// AC := [SP + X]
    LoadSpX,
    /// [operand] := AC
    StoreAddr,

    // ==================== I/O ====================

    /// AC := random integer in 1..=100
    Get,
    /// Write AC to the output port selected by the operand
    PutPort,

    // ==================== Arithmetic / Moves ====================

    AddX,
    AddY,
    SubX,
    SubY,
    CopyToX,
    CopyFromX,
    CopyToY,
    CopyFromY,
    CopyToSp,
    CopyFromSp,

    // ==================== Control Flow ====================

    /// PC := operand
    JumpAddr,
    /// if AC == 0 then PC := operand
    JumpIfEqualAddr,
    /// if AC != 0 then PC := operand
    JumpIfNotEqualAddr,
    /// push PC; PC := operand
    CallAddr,
    /// PC := pop
    Ret,
    IncX,
    DecX,
    Push,
    Pop,

    // ==================== Privilege ====================

    /// System call
    Int,
    /// Return from interrupt
    IRet,
    /// End of execution
    End,
}

impl Opcode {
    /// Every opcode, in numeric order.
    pub const ALL: [Opcode; 31] = [
        Opcode::LoadValue,
        Opcode::LoadAddr,
        Opcode::LoadIndAddr,
        Opcode::LoadIdxX,
        Opcode::LoadIdxY,
        Opcode::LoadSpX,
        Opcode::StoreAddr,
        Opcode::Get,
        Opcode::PutPort,
        Opcode::AddX,
        Opcode::AddY,
        Opcode::SubX,
        Opcode::SubY,
        Opcode::CopyToX,
        Opcode::CopyFromX,
        Opcode::CopyToY,
        Opcode::CopyFromY,
        Opcode::CopyToSp,
        Opcode::CopyFromSp,
        Opcode::JumpAddr,
        Opcode::JumpIfEqualAddr,
        Opcode::JumpIfNotEqualAddr,
        Opcode::CallAddr,
        Opcode::Ret,
        Opcode::IncX,
        Opcode::DecX,
        Opcode::Push,
        Opcode::Pop,
        Opcode::Int,
        Opcode::IRet,
        Opcode::End,
    ];

    /// The numeric code stored in memory.
    pub const fn code(self) -> i32 {
        match self {
            Opcode::LoadValue => 1,
            Opcode::LoadAddr => 2,
            Opcode::LoadIndAddr => 3,
            Opcode::LoadIdxX => 4,
            Opcode::LoadIdxY => 5,
            Opcode::LoadSpX => 6,
            Opcode::StoreAddr => 7,
            Opcode::Get => 8,
            Opcode::PutPort => 9,
            Opcode::AddX => 10,
            Opcode::AddY => 11,
            Opcode::SubX => 12,
            Opcode::SubY => 13,
            Opcode::CopyToX => 14,
            Opcode::CopyFromX => 15,
            Opcode::CopyToY => 16,
            Opcode::CopyFromY => 17,
            Opcode::CopyToSp => 18,
            Opcode::CopyFromSp => 19,
            Opcode::JumpAddr => 20,
            Opcode::JumpIfEqualAddr => 21,
            Opcode::JumpIfNotEqualAddr => 22,
            Opcode::CallAddr => 23,
            Opcode::Ret => 24,
            Opcode::IncX => 25,
            Opcode::DecX => 26,
            Opcode::Push => 27,
            Opcode::Pop => 28,
            Opcode::Int => 29,
            Opcode::IRet => 30,
            Opcode::End => 50,
        }
    }

    /// Number of operand words following the opcode in the instruction stream.
    pub const fn operand_words(self) -> i32 {
        match self {
            Opcode::LoadValue
            | Opcode::LoadAddr
            | Opcode::LoadIndAddr
            | Opcode::LoadIdxX
            | Opcode::LoadIdxY
            | Opcode::StoreAddr
            | Opcode::PutPort
            | Opcode::JumpAddr
            | Opcode::JumpIfEqualAddr
            | Opcode::JumpIfNotEqualAddr
            | Opcode::CallAddr => 1,
            _ => 0,
        }
    }

    /// Whether the opcode is followed by an operand word.
    pub const fn has_operand(self) -> bool {
        self.operand_words() == 1
    }

    /// Assembly mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::LoadValue => "LoadValue",
            Opcode::LoadAddr => "LoadAddr",
            Opcode::LoadIndAddr => "LoadIndAddr",
            Opcode::LoadIdxX => "LoadIdxXAddr",
            Opcode::LoadIdxY => "LoadIdxYAddr",
            Opcode::LoadSpX => "LoadSpX",
            Opcode::StoreAddr => "StoreAddr",
            Opcode::Get => "Get",
            Opcode::PutPort => "PutPort",
            Opcode::AddX => "AddX",
            Opcode::AddY => "AddY",
            Opcode::SubX => "SubX",
            Opcode::SubY => "SubY",
            Opcode::CopyToX => "CopyToX",
            Opcode::CopyFromX => "CopyFromX",
            Opcode::CopyToY => "CopyToY",
            Opcode::CopyFromY => "CopyFromY",
            Opcode::CopyToSp => "CopyToSp",
            Opcode::CopyFromSp => "CopyFromSp",
            Opcode::JumpAddr => "JumpAddr",
            Opcode::JumpIfEqualAddr => "JumpIfEqualAddr",
            Opcode::JumpIfNotEqualAddr => "JumpIfNotEqualAddr",
            Opcode::CallAddr => "CallAddr",
            Opcode::Ret => "Ret",
            Opcode::IncX => "IncX",
            Opcode::DecX => "DecX",
            Opcode::Push => "Push",
            Opcode::Pop => "Pop",
            Opcode::Int => "Int",
            Opcode::IRet => "IRet",
            Opcode::End => "End",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode {0}")]
    InvalidOpcode(i32),
}

/// Decode an opcode word.
pub fn decode(word: i32) -> Result<Opcode, DecodeError> {
    let opcode = match word {
        1 => Opcode::LoadValue,
        2 => Opcode::LoadAddr,
        3 => Opcode::LoadIndAddr,
        4 => Opcode::LoadIdxX,
        5 => Opcode::LoadIdxY,
        6 => Opcode::LoadSpX,
        7 => Opcode::StoreAddr,
        8 => Opcode::Get,
        9 => Opcode::PutPort,
        10 => Opcode::AddX,
        11 => Opcode::AddY,
        12 => Opcode::SubX,
        13 => Opcode::SubY,
        14 => Opcode::CopyToX,
        15 => Opcode::CopyFromX,
        16 => Opcode::CopyToY,
        17 => Opcode::CopyFromY,
        18 => Opcode::CopyToSp,
        19 => Opcode::CopyFromSp,
        20 => Opcode::JumpAddr,
        21 => Opcode::JumpIfEqualAddr,
        22 => Opcode::JumpIfNotEqualAddr,
        23 => Opcode::CallAddr,
        24 => Opcode::Ret,
        25 => Opcode::IncX,
        26 => Opcode::DecX,
        27 => Opcode::Push,
        28 => Opcode::Pop,
        29 => Opcode::Int,
        30 => Opcode::IRet,
        50 => Opcode::End,
        other => return Err(DecodeError::InvalidOpcode(other)),
    };
    Ok(opcode)
}
