//! Randomness behind jittered TTLs and probabilistic refresh

use rand::Rng;

/// Source of random draws for jitter and refresh decisions
///
/// Injectable so tests can force or suppress refresh triggering
/// deterministically instead of sampling a real RNG.
pub trait RandomSource: Send + Sync + 'static {
    /// Uniform draw in [0, 1)
    fn unit(&self) -> f64;

    /// Uniform integer draw in [lo, hi], inclusive on both ends
    fn range(&self, lo: i64, hi: i64) -> i64;
}

/// Thread-local RNG source (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn unit(&self) -> f64 {
        rand::rng().random::<f64>()
    }

    fn range(&self, lo: i64, hi: i64) -> i64 {
        rand::rng().random_range(lo..=hi)
    }
}

/// Source returning preset values, for deterministic tests
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom {
    unit: f64,
    jitter: i64,
}

impl FixedRandom {
    /// `unit` is returned from every [`RandomSource::unit`] draw; `jitter`
    /// from every [`RandomSource::range`] draw, clamped to the requested bounds.
    pub fn new(unit: f64, jitter: i64) -> Self {
        Self { unit, jitter }
    }
}

impl RandomSource for FixedRandom {
    fn unit(&self) -> f64 {
        self.unit
    }

    fn range(&self, lo: i64, hi: i64) -> i64 {
        self.jitter.clamp(lo, hi)
    }
}
