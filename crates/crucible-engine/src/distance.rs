// crucible-engine/src/distance.rs
// ============================================================================
// Module: Crucible Hybrid Distance
// Description: Type-aware genotype distance for trust-region checks.
// Purpose: Combine Euclidean, Hamming, and categorical contributions into
//          one normalized scalar.
// Dependencies: crate::{genespace, genotype}
// ============================================================================

//! ## Overview
//! The hybrid distance mixes per-kind contributions: squared weighted
//! differences for continuous genes (Euclidean after a square root), weighted
//! Hamming for flags, and weighted absolute difference for discrete genes
//! when it exceeds a small dead zone. The result is clamped into `[0, 1]` so
//! trust-region radii compare directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::genespace::GeneKind;
use crate::genespace::GeneSpace;
use crate::genotype::Genotype;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Discrete differences below this threshold are ignored.
const DISCRETE_DEAD_ZONE: f64 = 0.1;

// ============================================================================
// SECTION: Hybrid Distance
// ============================================================================

/// Computes the hybrid distance between two genotypes over shared genes.
///
/// Vectors shorter than the space contribute only their shared prefix; the
/// caller is responsible for keeping genotypes aligned to one schema.
#[must_use]
pub fn hybrid_distance(space: &GeneSpace, a: &Genotype, b: &Genotype) -> f64 {
    let shared = space.len().min(a.values.len()).min(b.values.len());
    let mut squared_sum = 0.0_f64;
    let mut hamming_sum = 0.0_f64;

    for index in 0..shared {
        let gene = &space.genes[index];
        let weight = gene.kind.weight();
        let va = a.values[index];
        let vb = b.values[index];
        match &gene.kind {
            GeneKind::Float {
                ..
            }
            | GeneKind::Int {
                ..
            } => {
                let diff = (va - vb) * weight;
                squared_sum += diff * diff;
            }
            GeneKind::Flag {
                ..
            } => {
                if (va.round() - vb.round()).abs() > f64::EPSILON {
                    hamming_sum += weight;
                }
            }
            GeneKind::Discrete {
                ..
            } => {
                let diff = (va - vb).abs();
                if diff > DISCRETE_DEAD_ZONE {
                    hamming_sum += weight * diff;
                }
            }
        }
    }

    (squared_sum.sqrt() + hamming_sum).min(1.0)
}
