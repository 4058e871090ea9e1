//! Address space and the memory port the CPU talks through.
//!
//! The CPU never owns memory. It issues reads and writes through a
//! [`MemoryPort`], which is backed either by an in-process [`Memory`] or by a
//! client speaking to a memory service (see [`crate::link`]).

use crate::cpu::decode::MEMORY_SIZE;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// The number of memory cells, as an index bound.
pub const CELL_COUNT: usize = MEMORY_SIZE as usize;

/// Read/write/terminate access to an address space.
///
/// Implementations perform no protection checks; the CPU validates every
/// address before it reaches the port. Calls are strictly sequential: a read
/// returns only once its value has been received.
pub trait MemoryPort {
    /// Read one cell.
    fn read(&mut self, addr: i32) -> Result<i32, PortError>;

    /// Write one cell.
    fn write(&mut self, addr: i32, value: i32) -> Result<(), PortError>;

    /// Tell the backing service to stop. No further requests follow.
    fn terminate(&mut self) -> Result<(), PortError>;
}

impl<P: MemoryPort + ?Sized> MemoryPort for &mut P {
    fn read(&mut self, addr: i32) -> Result<i32, PortError> {
        (**self).read(addr)
    }

    fn write(&mut self, addr: i32, value: i32) -> Result<(), PortError> {
        (**self).write(addr, value)
    }

    fn terminate(&mut self) -> Result<(), PortError> {
        (**self).terminate()
    }
}

/// Errors reported by a memory port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    /// The service answered with something that is not a decimal integer.
    #[error("malformed response from memory service: {0:?}")]
    Protocol(String),

    #[error("memory service I/O error: {0}")]
    Io(String),

    #[error("memory service disconnected")]
    Disconnected,

    #[error("{0}")]
    Memory(#[from] MemoryError),
}

/// The 2000-cell address space.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    cells: Vec<i32>,
}

impl Memory {
    /// Create a new memory with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![0; CELL_COUNT],
        }
    }

    /// Read a cell.
    pub fn get(&self, addr: i32) -> Result<i32, MemoryError> {
        let index = Self::index(addr)?;
        Ok(self.cells[index])
    }

    /// Write a cell.
    pub fn set(&mut self, addr: i32, value: i32) -> Result<(), MemoryError> {
        let index = Self::index(addr)?;
        self.cells[index] = value;
        Ok(())
    }

    fn index(addr: i32) -> Result<usize, MemoryError> {
        usize::try_from(addr)
            .ok()
            .filter(|&index| index < CELL_COUNT)
            .ok_or(MemoryError::AddressOutOfRange(addr))
    }

    /// Copy `words` into memory starting at `start`.
    pub fn load(&mut self, start: i32, words: &[i32]) -> Result<(), MemoryError> {
        let begin = Self::index(start)?;
        if begin + words.len() > CELL_COUNT {
            return Err(MemoryError::ProgramTooLarge {
                size: words.len(),
                available: CELL_COUNT - begin,
            });
        }
        self.cells[begin..begin + words.len()].copy_from_slice(words);
        Ok(())
    }

    /// Dump memory contents (for debugging).
    pub fn dump(&self, start: usize, count: usize) -> Vec<(usize, i32)> {
        let end = start.saturating_add(count).min(CELL_COUNT);
        (start.min(end)..end)
            .map(|i| (i, self.cells[i]))
            .collect()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|&&cell| cell != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &CELL_COUNT)
            .finish()
    }
}

impl MemoryPort for Memory {
    fn read(&mut self, addr: i32) -> Result<i32, PortError> {
        Ok(self.get(addr)?)
    }

    fn write(&mut self, addr: i32, value: i32) -> Result<(), PortError> {
        Ok(self.set(addr, value)?)
    }

    fn terminate(&mut self) -> Result<(), PortError> {
        Ok(())
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("memory address {0} out of range (0-1999)")]
    AddressOutOfRange(i32),

    #[error("program size {size} exceeds available space {available}")]
    ProgramTooLarge { size: usize, available: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_write() {
        let mut mem = Memory::new();
        mem.set(10, 42).unwrap();
        assert_eq!(mem.get(10).unwrap(), 42);
    }

    #[test]
    fn test_memory_bounds() {
        let mem = Memory::new();

        assert!(mem.get(0).is_ok());
        assert!(mem.get(1999).is_ok());

        assert_eq!(mem.get(-1), Err(MemoryError::AddressOutOfRange(-1)));
        assert_eq!(mem.get(2000), Err(MemoryError::AddressOutOfRange(2000)));
    }

    #[test]
    fn test_load() {
        let mut mem = Memory::new();
        mem.load(1000, &[1, 2, 3]).unwrap();

        assert_eq!(mem.get(1000).unwrap(), 1);
        assert_eq!(mem.get(1002).unwrap(), 3);
        assert!(matches!(
            mem.load(1999, &[1, 2]),
            Err(MemoryError::ProgramTooLarge { size: 2, available: 1 })
        ));
    }

    #[test]
    fn test_memory_as_port() {
        let mut mem = Memory::new();
        mem.write(1500, -7).unwrap();
        assert_eq!(mem.read(1500).unwrap(), -7);
        assert_eq!(
            mem.read(5000),
            Err(PortError::Memory(MemoryError::AddressOutOfRange(5000)))
        );
        mem.terminate().unwrap();
    }

    #[test]
    fn test_dump_clamps() {
        let mut mem = Memory::new();
        mem.set(1998, 5).unwrap();
        assert_eq!(mem.dump(1998, 10), vec![(1998, 5), (1999, 0)]);
        assert!(mem.dump(3000, 4).is_empty());
    }
}
