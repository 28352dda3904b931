// crucible-engine/src/diversity.rs
// ============================================================================
// Module: Crucible Diverse Selection
// Description: Diversity-floored top-K candidate selection.
// Purpose: Keep the bundle from collapsing onto one mutation direction.
// Dependencies: crate::bundle, serde
// ============================================================================

//! ## Overview
//! Selection seeds with the best-scoring candidate, then admits candidates
//! only while their minimum diversity to the already-selected set clears the
//! floor. Diversity mixes operator-set Jaccard distance, base-distance
//! spread, and score spread. When the floored pass cannot fill K slots, the
//! remainder is admitted greedily by score and reported as filler.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::bundle::Candidate;
use crate::bundle::DiversitySummary;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Diversity selection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiversityConfig {
    /// Minimum pairwise diversity admitted by the floored pass.
    pub min_threshold: f64,
    /// Weight of the operator-set Jaccard distance.
    pub op_weight: f64,
    /// Weight of the base-distance spread.
    pub distance_weight: f64,
    /// Weight of the score spread.
    pub score_weight: f64,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            min_threshold: 0.3,
            op_weight: 0.4,
            distance_weight: 0.3,
            score_weight: 0.3,
        }
    }
}

// ============================================================================
// SECTION: Pairwise Diversity
// ============================================================================

/// Computes the pairwise candidate diversity.
#[must_use]
pub fn candidate_diversity(
    config: &DiversityConfig,
    a: &Candidate,
    b: &Candidate,
    max_score: f64,
) -> f64 {
    let ops_a: BTreeSet<&str> = a.op_seq.iter().map(String::as_str).collect();
    let ops_b: BTreeSet<&str> = b.op_seq.iter().map(String::as_str).collect();
    let union = ops_a.union(&ops_b).count();
    let intersection = ops_a.intersection(&ops_b).count();
    #[allow(clippy::cast_precision_loss, reason = "operator sets are tiny")]
    let jaccard = if union == 0 { 1.0 } else { intersection as f64 / union as f64 };

    let distance_spread = (a.distance_to_base - b.distance_to_base).abs();
    let score_spread =
        if max_score > 0.0 { (a.score - b.score).abs() / max_score } else { 0.0 };

    config.op_weight * (1.0 - jaccard)
        + config.distance_weight * distance_spread
        + config.score_weight * score_spread
}

// ============================================================================
// SECTION: Selection
// ============================================================================

/// Selects up to `k` diverse candidates from a score-descending pool.
///
/// Returns the selected indices into the pool plus the selection summary.
#[must_use]
pub fn select_top_k(
    config: &DiversityConfig,
    pool: &[Candidate],
    k: usize,
) -> (Vec<usize>, DiversitySummary) {
    let max_score = pool.first().map_or(0.0, |candidate| candidate.score);
    let mut selected: Vec<usize> = Vec::with_capacity(k);

    for (index, candidate) in pool.iter().enumerate() {
        if selected.len() >= k {
            break;
        }
        if selected.is_empty() {
            selected.push(index);
            continue;
        }
        let min_diversity = selected
            .iter()
            .map(|chosen| candidate_diversity(config, candidate, &pool[*chosen], max_score))
            .fold(f64::INFINITY, f64::min);
        if min_diversity >= config.min_threshold {
            selected.push(index);
        }
    }

    let mut greedy_fill = 0_usize;
    if selected.len() < k {
        for index in 0..pool.len() {
            if selected.len() >= k {
                break;
            }
            if !selected.contains(&index) {
                selected.push(index);
                greedy_fill += 1;
            }
        }
        selected.sort_unstable();
    }

    let min_pairwise = min_pairwise_diversity(config, pool, &selected, max_score);
    let summary = DiversitySummary {
        min_threshold: config.min_threshold,
        min_pairwise,
        selected: selected.len(),
        greedy_fill,
    };
    (selected, summary)
}

/// Computes the minimum pairwise diversity among selected candidates.
fn min_pairwise_diversity(
    config: &DiversityConfig,
    pool: &[Candidate],
    selected: &[usize],
    max_score: f64,
) -> f64 {
    let mut minimum = f64::INFINITY;
    for (position, left) in selected.iter().enumerate() {
        for right in selected.iter().skip(position + 1) {
            let diversity =
                candidate_diversity(config, &pool[*left], &pool[*right], max_score);
            minimum = minimum.min(diversity);
        }
    }
    if minimum.is_finite() { minimum } else { 1.0 }
}
