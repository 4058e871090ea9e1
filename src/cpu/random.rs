//! Seedable random source for the `Get` instruction.
//!
//! A xorshift64 generator: cheap, deterministic for a given seed, and good
//! enough for handing programs a number between 1 and 100.

use serde::{Serialize, Deserialize};

/// Seed used when the caller supplies zero (xorshift must not start at zero).
const FALLBACK_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// xorshift64 generator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XorShift {
    state: u64,
}

impl XorShift {
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { FALLBACK_SEED } else { seed };
        Self { state }
    }

    /// Seed from the system clock.
    pub fn from_entropy() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(FALLBACK_SEED);
        Self::new(nanos)
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform integer in `low..=high`.
    pub fn range_inclusive(&mut self, low: i32, high: i32) -> i32 {
        debug_assert!(low <= high);
        let span = (i64::from(high) - i64::from(low) + 1) as u64;
        let offset = self.next_u64() % span;
        (i64::from(low) + offset as i64) as i32
    }
}
