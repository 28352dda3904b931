// crucible-engine/src/score.rs
// ============================================================================
// Module: Crucible Safe-Utility Scoring
// Description: Non-compensatory candidate utility with saturation and
//              trust-region penalty.
// Purpose: Rank candidates so that no gain can buy its way past safety.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The score multiplies a combined predicted gain by the saturating
//! amplification factor and a reflexivity floor, divided by the risk-loaded
//! cost and a penalty that grows once a candidate strays past 70% of the
//! trust-region radius. Safety factors multiply rather than add, so a zero
//! anywhere zeroes the whole score.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Scoring Parameters
// ============================================================================

/// Tunable scoring coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreParams {
    /// Weight of the description-length gain in the combined gain.
    pub mdl_weight: f64,
    /// Weight of the perplexity headroom in the combined gain.
    pub ppl_weight: f64,
    /// Risk loading in the denominator.
    pub lambda_rho: f64,
    /// Denominator stabilizer.
    pub epsilon: f64,
    /// Saturation constant for the amplification factor.
    pub kappa: f64,
    /// Trust-region share where the penalty starts.
    pub tr_penalty_knee: f64,
    /// Penalty slope past the knee.
    pub tr_penalty_slope: f64,
    /// Reflexivity floor in the numerator.
    pub sr_floor: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            mdl_weight: 0.3,
            ppl_weight: 0.1,
            lambda_rho: 0.5,
            epsilon: 1e-6,
            kappa: 20.0,
            tr_penalty_knee: 0.7,
            tr_penalty_slope: 2.0,
            sr_floor: 0.1,
        }
    }
}

// ============================================================================
// SECTION: Scoring Inputs
// ============================================================================

/// Everything the scoring function consumes for one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    /// Predicted improvement.
    pub delta_linf_hat: f64,
    /// Predicted description-length gain.
    pub mdl_gain_hat: f64,
    /// Predicted out-of-distribution perplexity.
    pub ppl_ood_hat: f64,
    /// Candidate cost estimate in `[0, 1]`.
    pub cost: f64,
    /// Candidate risk estimate in `[0, 1]`.
    pub risk: f64,
    /// State amplification factor.
    pub caos_post: f64,
    /// State reflexivity score.
    pub sr_score: f64,
    /// Candidate distance to the base genotype.
    pub tr_distance: f64,
    /// Trust-region radius.
    pub tr_radius: f64,
}

// ============================================================================
// SECTION: Saturation
// ============================================================================

/// Saturating amplification: `φ(z, κ) = min(1, ln(max(1, z)) / ln(1 + κ))`.
#[must_use]
pub fn phi(z: f64, kappa: f64) -> f64 {
    let numerator = z.max(1.0).ln();
    let denominator = (1.0 + kappa.max(0.0)).ln().max(f64::MIN_POSITIVE);
    (numerator / denominator).min(1.0)
}

// ============================================================================
// SECTION: Scoring
// ============================================================================

/// Computes the safe-utility score for one candidate.
#[must_use]
pub fn safe_utility(params: &ScoreParams, inputs: &ScoreInputs) -> f64 {
    let combined_gain = inputs.delta_linf_hat
        + params.mdl_weight * inputs.mdl_gain_hat
        + params.ppl_weight * ((100.0 - inputs.ppl_ood_hat) / 100.0).max(0.0);

    let denom = inputs.cost + params.lambda_rho * inputs.risk + params.epsilon;

    let tr_penalty = if inputs.tr_radius <= 0.0
        || inputs.tr_distance <= params.tr_penalty_knee * inputs.tr_radius
    {
        1.0
    } else {
        1.0 + params.tr_penalty_slope
            * (inputs.tr_distance / inputs.tr_radius - params.tr_penalty_knee)
    };

    let score = combined_gain * phi(inputs.caos_post, params.kappa)
        * inputs.sr_score.max(params.sr_floor)
        / (denom * tr_penalty);
    score.max(0.0)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

    use super::*;

    /// Healthy scoring inputs used as the test baseline.
    fn baseline_inputs() -> ScoreInputs {
        ScoreInputs {
            delta_linf_hat: 0.02,
            mdl_gain_hat: 0.05,
            ppl_ood_hat: 92.0,
            cost: 0.1,
            risk: 0.1,
            caos_post: 1.4,
            sr_score: 0.85,
            tr_distance: 0.05,
            tr_radius: 0.12,
        }
    }

    #[test]
    fn phi_saturates_at_one() {
        assert!(phi(1.0, 20.0).abs() < f64::EPSILON);
        assert!((phi(1e9, 20.0) - 1.0).abs() < f64::EPSILON);
        assert!(phi(5.0, 20.0) > phi(2.0, 20.0));
    }

    #[test]
    fn score_is_positive_for_healthy_inputs() {
        let score = safe_utility(&ScoreParams::default(), &baseline_inputs());
        assert!(score > 0.0);
    }

    #[test]
    fn risk_depresses_the_score() {
        let params = ScoreParams::default();
        let mut risky = baseline_inputs();
        risky.risk = 0.9;
        assert!(safe_utility(&params, &risky) < safe_utility(&params, &baseline_inputs()));
    }

    #[test]
    fn trust_region_penalty_kicks_in_past_the_knee() {
        let params = ScoreParams::default();
        let mut near_edge = baseline_inputs();
        near_edge.tr_distance = 0.115;
        let mut inside = baseline_inputs();
        inside.tr_distance = 0.05;
        assert!(safe_utility(&params, &near_edge) < safe_utility(&params, &inside));
    }

    #[test]
    fn zero_gain_yields_zero_score() {
        let mut inputs = baseline_inputs();
        inputs.delta_linf_hat = 0.0;
        inputs.mdl_gain_hat = 0.0;
        inputs.ppl_ood_hat = 100.0;
        let score = safe_utility(&ScoreParams::default(), &inputs);
        assert!(score.abs() < f64::EPSILON);
    }
}
