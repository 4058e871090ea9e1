//! The memory service.
//!
//! Owns the address space and answers requests, either as text lines over a
//! reader/writer pair (e.g. a child process's stdin/stdout) or as messages
//! over channels. It performs no protection checks of its own.

use crate::asm::program::{parse_program, Program, ProgramError};
use crate::cpu::memory::{Memory, MemoryError};
use crate::link::protocol::{Request, RequestError};
use std::io::{BufRead, Write};
use std::sync::mpsc::{Receiver, Sender};
use thiserror::Error;
use tracing::debug;

/// Owner of the address space.
#[derive(Debug, Clone, Default)]
pub struct MemoryService {
    memory: Memory,
    /// Requests handled so far.
    served: u64,
}

impl MemoryService {
    pub fn new(memory: Memory) -> Self {
        Self { memory, served: 0 }
    }

    /// Parse a program description into a fresh address space.
    pub fn load(source: &str) -> Result<Self, ProgramError> {
        Ok(Self::from(parse_program(source)?))
    }

    /// Apply one request. Reads return the value to send back.
    pub fn handle(&mut self, request: Request) -> Result<Option<i32>, MemoryError> {
        self.served += 1;
        match request {
            Request::Read(addr) => self.memory.get(addr).map(Some),
            Request::Write(addr, value) => self.memory.set(addr, value).map(|()| None),
            Request::End => Ok(None),
        }
    }

    /// Serve text requests until `e`, a blank line, or end of input.
    pub fn serve<R: BufRead, W: Write>(
        &mut self,
        input: R,
        mut output: W,
    ) -> Result<(), ServiceError> {
        for (line_num, line) in input.lines().enumerate() {
            let line = line.map_err(|e| ServiceError::Io(e.to_string()))?;
            if line.trim().is_empty() {
                break;
            }

            let request = match line.parse::<Request>() {
                Ok(request) => request,
                Err(RequestError::UnknownCommand(c)) => {
                    debug!(command = %c, "ignoring unknown command");
                    continue;
                }
                Err(e) => {
                    return Err(ServiceError::Protocol {
                        line: line_num + 1,
                        message: e.to_string(),
                    })
                }
            };

            if request == Request::End {
                break;
            }
            if let Some(value) = self.handle(request)? {
                writeln!(output, "{}", value)
                    .and_then(|()| output.flush())
                    .map_err(|e| ServiceError::Io(e.to_string()))?;
            }
        }

        debug!(served = self.served, "memory service stopped");
        Ok(())
    }

    /// Serve message requests until `End` or until the CPU side hangs up.
    pub fn serve_channel(
        &mut self,
        requests: Receiver<Request>,
        replies: Sender<i32>,
    ) -> Result<(), ServiceError> {
        while let Ok(request) = requests.recv() {
            if request == Request::End {
                break;
            }
            if let Some(value) = self.handle(request)? {
                replies.send(value).map_err(|_| ServiceError::Disconnected)?;
            }
        }

        debug!(served = self.served, "memory service stopped");
        Ok(())
    }

    /// The address space.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Number of requests handled.
    pub fn served(&self) -> u64 {
        self.served
    }
}

impl From<Program> for MemoryService {
    fn from(program: Program) -> Self {
        Self::new(program.memory)
    }
}

/// Errors raised while serving requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("bad request on line {line}: {message}")]
    Protocol { line: usize, message: String },

    #[error("{0}")]
    Memory(#[from] MemoryError),

    #[error("CPU disconnected")]
    Disconnected,

    #[error("memory service thread panicked")]
    Panicked,
}
