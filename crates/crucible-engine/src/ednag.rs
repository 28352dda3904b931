// crucible-engine/src/ednag.rs
// ============================================================================
// Module: Crucible EDNAG Operators
// Description: Evolutionary operator set with adaptive noise and elitism.
// Purpose: Produce candidate genotypes from the base under the trust region.
// Dependencies: crate::{genespace, genotype, rng}
// ============================================================================

//! ## Overview
//! EDNAG is the operator set of the mutation engine: point, segment,
//! recombination, and flag operators plus an elite slot. Noise scales with
//! the trust-region radius and adapts to the reflexivity score: a shaky
//! learner mutates gently while a confident one explores harder. All draws
//! come from the caller's seeded generator.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::genespace::GeneSpace;
use crate::genotype::Genotype;
use crate::rng::DetRng;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Sampling weight of the point operator.
const WEIGHT_POINT: f64 = 0.4;
/// Sampling weight of the segment operator.
const WEIGHT_SEGMENT: f64 = 0.25;
/// Sampling weight of the recombination operator.
const WEIGHT_RECOMBINATION: f64 = 0.2;

/// Point operator noise scale.
const POINT_STDDEV_SCALE: f64 = 0.15;
/// Segment operator noise scale.
const SEGMENT_STDDEV_SCALE: f64 = 0.12;
/// Share of mutable genes a point mutation touches.
const POINT_GENE_SHARE: f64 = 0.3;
/// Share of continuous genes a segment mutation spans.
const SEGMENT_SPAN_SHARE: f64 = 0.5;
/// Recombination blend noise stddev.
const RECOMBINATION_NOISE: f64 = 0.02;

// ============================================================================
// SECTION: Operator Kind
// ============================================================================

/// Evolutionary operator identifiers recorded in candidate op sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    /// Gaussian mutation of randomly selected mutable genes.
    Point,
    /// Gaussian mutation of a contiguous continuous-gene run.
    Segment,
    /// Point variant blended against a partner genotype.
    Recombination,
    /// Flip of randomly selected flag genes.
    Flag,
    /// Elite re-emission (no mutation).
    Elite,
}

impl OperatorKind {
    /// Returns the stable string label for the operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Segment => "segment",
            Self::Recombination => "recombination",
            Self::Flag => "flag",
            Self::Elite => "elite",
        }
    }

    /// Samples an operator from the fixed weight table.
    pub fn sample(rng: &mut DetRng) -> Self {
        let draw = rng.uniform();
        if draw < WEIGHT_POINT {
            Self::Point
        } else if draw < WEIGHT_POINT + WEIGHT_SEGMENT {
            Self::Segment
        } else if draw < WEIGHT_POINT + WEIGHT_SEGMENT + WEIGHT_RECOMBINATION {
            Self::Recombination
        } else {
            Self::Flag
        }
    }
}

// ============================================================================
// SECTION: Adaptive Noise
// ============================================================================

/// Returns the SR-adaptive noise multiplier.
///
/// Below 0.7 reflexivity the learner is poorly calibrated and mutations are
/// halved; above 0.9 exploration widens.
#[must_use]
pub fn sr_noise_multiplier(sr_score: f64) -> f64 {
    if sr_score < 0.7 {
        0.5
    } else if sr_score > 0.9 {
        1.2
    } else {
        1.0
    }
}

// ============================================================================
// SECTION: Operators
// ============================================================================

/// Operator execution context shared across one generation loop.
#[derive(Debug, Clone, Copy)]
pub struct OperatorContext {
    /// Trust-region radius.
    pub radius: f64,
    /// SR-adaptive noise multiplier.
    pub sr_multiplier: f64,
}

/// Applies the point operator: mutate `ceil(r · |M| · 0.3)` mutable genes.
pub fn point(
    space: &GeneSpace,
    base: &Genotype,
    ctx: OperatorContext,
    rng: &mut DetRng,
) -> Genotype {
    let mut child = child_of(base);
    let mutable = space.mutable_indices();
    if mutable.is_empty() {
        return child;
    }
    let count = share_count(mutable.len(), ctx.radius * POINT_GENE_SHARE);
    for _ in 0..count {
        let index = mutable[rng.index(mutable.len())];
        let weight = space.genes[index].kind.weight();
        let stddev = POINT_STDDEV_SCALE * ctx.radius * weight * ctx.sr_multiplier;
        child.values[index] += rng.gaussian_scaled(stddev);
    }
    child.clamp_all();
    child
}

/// Applies the segment operator: mutate a contiguous continuous run.
pub fn segment(
    space: &GeneSpace,
    base: &Genotype,
    ctx: OperatorContext,
    rng: &mut DetRng,
) -> Genotype {
    let mut child = child_of(base);
    let continuous = space.continuous_indices();
    if continuous.is_empty() {
        return child;
    }
    let span = share_count(continuous.len(), ctx.radius * SEGMENT_SPAN_SHARE);
    let start = rng.index(continuous.len());
    for offset in 0..span {
        let position = (start + offset) % continuous.len();
        let index = continuous[position];
        let weight = space.genes[index].kind.weight();
        let stddev = SEGMENT_STDDEV_SCALE * ctx.radius * weight * ctx.sr_multiplier;
        child.values[index] += rng.gaussian_scaled(stddev);
    }
    child.clamp_all();
    child
}

/// Applies the recombination operator: point variant blended with a partner.
///
/// Each shared gene blends with probability 0.5 as
/// `α·a + (1−α)·b + N(0, 0.02)` with `α ∈ [0.3, 0.7]`.
pub fn recombination(
    space: &GeneSpace,
    base: &Genotype,
    partner: &Genotype,
    ctx: OperatorContext,
    rng: &mut DetRng,
) -> Genotype {
    let mut child = point(space, base, ctx, rng);
    let shared = child.values.len().min(partner.values.len());
    for index in 0..shared {
        if rng.chance(0.5) {
            let alpha = rng.uniform_in(0.3, 0.7);
            let blended = alpha * child.values[index] + (1.0 - alpha) * partner.values[index];
            child.values[index] = blended + rng.gaussian_scaled(RECOMBINATION_NOISE);
        }
    }
    child.parents.push(partner.hash_base.clone());
    child.clamp_all();
    child
}

/// Applies the flag operator: flip `ceil(r · |F|)` flag genes.
pub fn flag(
    space: &GeneSpace,
    base: &Genotype,
    ctx: OperatorContext,
    rng: &mut DetRng,
) -> Genotype {
    let mut child = child_of(base);
    let flags = space.flag_indices();
    if flags.is_empty() {
        return child;
    }
    let count = share_count(flags.len(), ctx.radius);
    for _ in 0..count {
        let index = flags[rng.index(flags.len())];
        let current = child.values[index].round();
        child.values[index] = 1.0 - current;
    }
    child.clamp_all();
    child
}

// ============================================================================
// SECTION: Elite Slot
// ============================================================================

/// Best genotype observed during one generation loop.
#[derive(Debug, Clone, Default)]
pub struct EliteSlot {
    /// Elite genotype, when one exists.
    pub genotype: Option<Genotype>,
    /// Elite provisional score.
    pub score: f64,
}

impl EliteSlot {
    /// Offers a scored genotype to the slot, keeping the better one.
    pub fn offer(&mut self, genotype: &Genotype, score: f64) {
        if self.genotype.is_none() || score > self.score {
            self.genotype = Some(genotype.clone());
            self.score = score;
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Clones a base genotype into a child carrying the base as parent.
fn child_of(base: &Genotype) -> Genotype {
    Genotype {
        values: base.values.clone(),
        schema_version: base.schema_version.clone(),
        hash_base: base.hash_base.clone(),
        parents: vec![base.hash_base.clone()],
    }
}

/// Computes `ceil(share · len)` clamped into `[1, len]`.
fn share_count(len: usize, share: f64) -> usize {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        reason = "gene counts are tiny and the product is clamped"
    )]
    let raw = (share * len as f64).ceil() as usize;
    raw.clamp(1, len)
}
