// crucible-engine/src/features.rs
// ============================================================================
// Module: Crucible Feature Extraction
// Description: Fixed-order candidate feature vectors for the surrogate.
// Purpose: Fold concrete parameters and acquisition signals into numbers.
// Dependencies: crate::{bench, genespace, genotype}, crucible-core
// ============================================================================

//! ## Overview
//! Features concatenate, in gene-space declaration order, the denormalized
//! gene values (categorical labels fold to `[0, 1)` via hash), followed by
//! the micro-benchmark outputs and the acquisition signals. The ordering is
//! part of the surrogate contract: history samples and fresh candidates must
//! agree on it exactly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crucible_core::AcquisitionReport;
use crucible_core::hashing::hash_bytes;

use crate::bench::BenchResult;
use crate::genespace::GeneSpace;
use crate::genespace::ParamValue;
use crate::genotype::Genotype;

// ============================================================================
// SECTION: Extraction
// ============================================================================

/// Extracts the fixed-order feature vector for one candidate.
#[must_use]
pub fn extract(
    space: &GeneSpace,
    genotype: &Genotype,
    bench: BenchResult,
    acq: &AcquisitionReport,
) -> Vec<f64> {
    let params = genotype.denormalize(space);
    let mut features = Vec::with_capacity(space.len() + 8);
    for gene in &space.genes {
        let value = params.get(&gene.name).map_or(0.0, param_feature);
        features.push(value);
    }

    features.push(bench.latency_ms / 1_000.0);
    features.push(bench.cost);
    features.push(bench.risk);
    features.push(acq.novelty_sim);
    features.push(acq.rag_recall);
    #[allow(clippy::cast_precision_loss, reason = "question count is capped at ten")]
    features.push(acq.anchor_questions().len() as f64 / 10.0);
    #[allow(clippy::cast_precision_loss, reason = "document counts sit far below 2^52")]
    features.push(acq.n_docs as f64 / 100.0);
    #[allow(clippy::cast_precision_loss, reason = "chunk counts sit far below 2^52")]
    features.push(acq.n_chunks as f64 / 1_000.0);
    features
}

/// Folds one concrete parameter into a feature value.
fn param_feature(value: &ParamValue) -> f64 {
    match value {
        ParamValue::Float(_) | ParamValue::Int(_) => value.as_f64().unwrap_or(0.0),
        ParamValue::Flag(flag) => f64::from(u8::from(*flag)),
        ParamValue::Choice(label) => string_fold(label),
    }
}

/// Folds a categorical label into `[0, 1)` via its content hash.
fn string_fold(label: &str) -> f64 {
    let digest = hash_bytes(label.as_bytes());
    let prefix = digest.get(..8).unwrap_or("0");
    let folded = u32::from_str_radix(prefix, 16).unwrap_or(0);
    f64::from(folded) / (f64::from(u32::MAX) + 1.0)
}
