// crucible-engine/src/rng.rs
// ============================================================================
// Module: Crucible Deterministic Randomness
// Description: Seeded pseudo-random source for the mutation pipeline.
// Purpose: Keep every stochastic engine decision replayable from hash
//          material.
// Dependencies: crucible-core, rand
// ============================================================================

//! ## Overview
//! The engine never draws entropy from the OS. Every random decision flows
//! through a [`DetRng`] seeded from canonical hash material, so identical
//! inputs replay to identical bundles.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crucible_core::hashing::seed_from_digest;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

// ============================================================================
// SECTION: Deterministic RNG
// ============================================================================

/// Seeded pseudo-random source with the distribution helpers the operators
/// need.
#[derive(Debug)]
pub struct DetRng {
    /// Underlying seeded generator.
    inner: StdRng,
}

impl DetRng {
    /// Creates a generator from a 64-bit seed.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates a generator from hex digest material.
    #[must_use]
    pub fn from_digest(digest: &str) -> Self {
        Self::from_seed(seed_from_digest(digest))
    }

    /// Draws a uniform value in `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.inner.r#gen::<f64>()
    }

    /// Draws a uniform value in `[lo, hi)`.
    pub fn uniform_in(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.uniform()
    }

    /// Draws a uniform index below `bound` (which must be non-zero).
    pub fn index(&mut self, bound: usize) -> usize {
        self.inner.gen_range(0..bound.max(1))
    }

    /// Draws a standard Gaussian via the Box-Muller transform.
    pub fn gaussian(&mut self) -> f64 {
        let u1 = self.uniform().max(1e-12);
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    /// Draws a Gaussian with the provided standard deviation.
    pub fn gaussian_scaled(&mut self, stddev: f64) -> f64 {
        self.gaussian() * stddev
    }

    /// Returns true with the provided probability.
    pub fn chance(&mut self, probability: f64) -> bool {
        self.uniform() < probability
    }
}
