// crucible-engine/src/fabric.rs
// ============================================================================
// Module: Crucible DNA-Fabric
// Description: Deterministic base genotype construction.
// Purpose: Derive the cycle's base coordinates from state, plan, and
//          acquisition evidence.
// Dependencies: crate::{genespace, genotype, rng}, crucible-core
// ============================================================================

//! ## Overview
//! DNA-Fabric turns `H(state || plan || acq)` into the base genotype every
//! operator perturbs. Float genes start at 0.5 nudged by acquisition-text
//! hints; anchor flag genes follow acquisition anchor questions; everything
//! else draws from the seeded generator. The procedure is a pure function of
//! its hash material.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crucible_core::AcquisitionReport;
use crucible_core::hashing::HashError;
use crucible_core::hashing::hash_segments;
use crucible_core::hashing::seed_from_digest;

use crate::genespace::GeneKind;
use crate::genespace::GeneSpace;
use crate::genotype::Genotype;
use crate::rng::DetRng;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum absolute hint perturbation applied to float genes.
const HINT_PERTURBATION: f64 = 0.05;

/// Minimum token length considered when matching anchor questions.
const ANCHOR_TOKEN_MIN_LEN: usize = 4;

// ============================================================================
// SECTION: Fabric
// ============================================================================

/// Builds the deterministic base genotype for one cycle.
///
/// `cycle_digest` must be `H(state || plan || acq || seed)` so repeated
/// invocations with identical inputs replay byte-identically.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when genotype hashing fails.
pub fn base_genotype(
    space: &GeneSpace,
    acq: &AcquisitionReport,
    cycle_digest: &str,
) -> Result<Genotype, HashError> {
    let mut rng = DetRng::from_seed(seed_from_digest(cycle_digest));
    let hint_digest = hint_material(acq);

    let mut values = Vec::with_capacity(space.len());
    for gene in &space.genes {
        let value = match &gene.kind {
            GeneKind::Float {
                ..
            } => 0.5 + hint_perturbation(&hint_digest, &gene.name),
            GeneKind::Int {
                ..
            } => 0.5,
            GeneKind::Flag {
                ..
            } => {
                if gene.anchor {
                    anchor_seed(acq, &gene.name)
                } else {
                    f64::from(u8::from(rng.chance(0.5)))
                }
            }
            GeneKind::Discrete {
                ..
            } => rng.uniform(),
        };
        values.push(value.clamp(0.0, 1.0));
    }

    let mut genotype = Genotype {
        values,
        schema_version: space.version.clone(),
        hash_base: String::new(),
        parents: Vec::new(),
    };
    genotype.hash_base = genotype.identity_hash()?;
    Ok(genotype)
}

// ============================================================================
// SECTION: Hint Derivation
// ============================================================================

/// Folds acquisition text hints into stable digest material.
fn hint_material(acq: &AcquisitionReport) -> Option<String> {
    let mut segments: Vec<&[u8]> = Vec::new();
    if let Some(excerpt) = acq.synthesis_excerpt.as_deref() {
        segments.push(excerpt.as_bytes());
    }
    for question in acq.anchor_questions() {
        segments.push(question.as_bytes());
    }
    if segments.is_empty() {
        None
    } else {
        Some(hash_segments(&segments))
    }
}

/// Derives a small symmetric perturbation for one float gene.
fn hint_perturbation(hint_digest: &Option<String>, gene_name: &str) -> f64 {
    let Some(digest) = hint_digest else {
        return 0.0;
    };
    let folded = hash_segments(&[digest.as_bytes(), gene_name.as_bytes()]);
    let unit = normalized_from_digest(&folded);
    (unit - 0.5) * 2.0 * HINT_PERTURBATION
}

/// Seeds an anchor flag gene from the acquisition anchor questions.
///
/// The gene fires when any anchor question mentions one of the gene name's
/// distinctive tokens; absent evidence leaves the capability off.
fn anchor_seed(acq: &AcquisitionReport, gene_name: &str) -> f64 {
    let tokens: Vec<&str> = gene_name
        .split('_')
        .filter(|token| token.len() >= ANCHOR_TOKEN_MIN_LEN)
        .collect();
    let mentioned = acq.anchor_questions().iter().any(|question| {
        let lowered = question.to_lowercase();
        tokens.iter().any(|token| lowered.contains(token))
    });
    f64::from(u8::from(mentioned))
}

/// Maps the first eight hex digits of a digest into `[0, 1)`.
fn normalized_from_digest(digest: &str) -> f64 {
    let prefix = digest.get(..8).unwrap_or("0");
    let folded = u32::from_str_radix(prefix, 16).unwrap_or(0);
    f64::from(folded) / f64::from(u32::MAX)
}
