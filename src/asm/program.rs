//! Program description format.
//!
//! A program is a plain text file describing the initial contents of memory:
//! - Blank lines are ignored
//! - `.N` moves the load cursor to address N
//! - A line starting with a digit stores its first whitespace-delimited
//!   token at the cursor, then advances the cursor
//! - Anything else is commentary
//!
//! ```text
//! 1      // LoadValue
//! 72     // 'H'
//! 9      // PutPort
//! 2
//! 50     // End
//!
//! .1000
//! 30     // IRet
//! ```

use crate::cpu::decode::MEMORY_SIZE;
use crate::cpu::memory::{Memory, MemoryError};
use std::ops::Range;
use std::path::Path;
use thiserror::Error;

/// A loaded program.
#[derive(Debug, Clone)]
pub struct Program {
    /// Initial memory image.
    pub memory: Memory,
    /// Address ranges that were written by the description, in source order.
    pub segments: Vec<Range<i32>>,
}

impl Program {
    /// Create a new empty program.
    pub fn new() -> Self {
        Self {
            memory: Memory::new(),
            segments: Vec::new(),
        }
    }

    /// Store a word at `addr`, extending the current segment when contiguous.
    fn push(&mut self, addr: i32, word: i32) -> Result<(), MemoryError> {
        self.memory.set(addr, word)?;

        match self.segments.last_mut() {
            Some(segment) if segment.end == addr => segment.end += 1,
            _ => self.segments.push(addr..addr + 1),
        }
        Ok(())
    }

    /// Number of words loaded.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a program description.
pub fn parse_program(source: &str) -> Result<Program, ProgramError> {
    let mut program = Program::new();
    let mut cursor: i32 = 0;

    for (line_num, line) in source.lines().enumerate() {
        let line_num = line_num + 1;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix('.') {
            let addr = parse_word(rest, line_num)?;
            if !(0..MEMORY_SIZE).contains(&addr) {
                return Err(ProgramError::OutOfRange { line: line_num, addr });
            }
            cursor = addr;
            continue;
        }

        // Comments and anything else not starting with a digit
        if !trimmed.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }

        let word = parse_word(trimmed, line_num)?;
        program
            .push(cursor, word)
            .map_err(|_| ProgramError::OutOfRange { line: line_num, addr: cursor })?;
        cursor += 1;
    }

    Ok(program)
}

/// Parse the first whitespace-delimited token as a decimal integer.
fn parse_word(text: &str, line: usize) -> Result<i32, ProgramError> {
    let token = text.split_whitespace().next().unwrap_or_default();
    token.parse().map_err(|_| ProgramError::ParseError {
        line,
        message: format!("expected a decimal integer, found {:?}", token),
    })
}

/// Load a program description from disk.
pub fn load_program<P: AsRef<Path>>(path: P) -> Result<Program, ProgramError> {
    let source = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ProgramError::IoError(e.to_string()))?;
    parse_program(&source)
}

/// Errors that can occur while loading a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("line {line}: address {addr} is outside memory (0-1999)")]
    OutOfRange { line: usize, addr: i32 },
}
