//! Runtime configuration.
//!
//! Validated once at startup; the CPU assumes every value it receives here
//! is already sane.

use crate::cpu::random::XorShift;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Settings for a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Instructions executed in user mode between timer interrupts.
    pub timer_threshold: u32,
    /// Seed for the `Get` instruction. `None` seeds from the clock.
    pub seed: Option<u64>,
    /// Stop after this many instructions, even if the program has not ended.
    pub max_cycles: Option<u64>,
}

impl Config {
    /// Build a configuration from a raw timer threshold.
    pub fn new(timer_threshold: i64) -> Result<Self, ConfigError> {
        if timer_threshold <= 0 {
            return Err(ConfigError::NonPositiveThreshold(timer_threshold));
        }
        let timer_threshold = u32::try_from(timer_threshold)
            .map_err(|_| ConfigError::ThresholdTooLarge(timer_threshold))?;

        Ok(Self {
            timer_threshold,
            seed: None,
            max_cycles: None,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = Some(max_cycles);
        self
    }

    /// Check a configuration built by hand or deserialized.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer_threshold == 0 {
            return Err(ConfigError::NonPositiveThreshold(0));
        }
        if self.max_cycles == Some(0) {
            return Err(ConfigError::ZeroCycleLimit);
        }
        Ok(())
    }

    /// The random source described by this configuration.
    pub fn rng(&self) -> XorShift {
        match self.seed {
            Some(seed) => XorShift::new(seed),
            None => XorShift::from_entropy(),
        }
    }
}

/// Invalid startup parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("timer threshold must be positive, got {0}")]
    NonPositiveThreshold(i64),

    #[error("timer threshold {0} is too large")]
    ThresholdTooLarge(i64),

    #[error("cycle limit must be at least 1")]
    ZeroCycleLimit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_threshold() {
        let config = Config::new(30).unwrap();
        assert_eq!(config.timer_threshold, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive() {
        assert_eq!(Config::new(0), Err(ConfigError::NonPositiveThreshold(0)));
        assert_eq!(Config::new(-5), Err(ConfigError::NonPositiveThreshold(-5)));
    }

    #[test]
    fn test_rejects_oversized() {
        let too_big = i64::from(u32::MAX) + 1;
        assert_eq!(Config::new(too_big), Err(ConfigError::ThresholdTooLarge(too_big)));
    }

    #[test]
    fn test_zero_cycle_limit() {
        let config = Config::new(10).unwrap().with_max_cycles(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroCycleLimit));
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let config = Config::new(10).unwrap().with_seed(99);
        assert_eq!(config.rng().next_u64(), config.rng().next_u64());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = Config::new(10).unwrap().with_seed(3);
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
