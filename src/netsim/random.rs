//! Seedable random source shared by every probability check of a filter

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform random number source.
///
/// One instance lives inside a filter and is only touched while the filter's
/// control lock is held, so it carries no synchronization of its own.
#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    /// Seed from the operating system's entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic source, same seed gives the same sequence
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Uniform double in `[0, 1)`
    pub fn uniform_double(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform integer in `[min, max)`.
    ///
    /// An empty range (`max <= min`) yields `min` without consuming randomness.
    pub fn uniform_int(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..max)
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}
