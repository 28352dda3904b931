// crucible-core/src/core/state.rs
// ============================================================================
// Module: Crucible System State
// Description: Flat scalar record describing the learner and its environment.
// Purpose: Define the gate-checked state attributes with bound validation.
// Dependencies: crate::core::hashing, serde
// ============================================================================

//! ## Overview
//! The system state is a flat record of scalar metrics. Gate-checked
//! attributes are fixed fields, never free-form maps, so threshold checks are
//! total and the compiler enforces presence. The engine is the only writer:
//! it fills predictions and appends audit references within a cycle.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;

// ============================================================================
// SECTION: Capability Flags
// ============================================================================

/// Fixed-schema capability flags derived from candidate patch contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Candidate set enables weight quantization.
    #[serde(default)]
    pub quantization: bool,
    /// Candidate set enables structured pruning.
    #[serde(default)]
    pub pruning: bool,
    /// Candidate set enables retrieval reranking.
    #[serde(default)]
    pub rag_rerank: bool,
    /// Candidate set enables self-check passes.
    #[serde(default)]
    pub self_check: bool,
}

// ============================================================================
// SECTION: System State
// ============================================================================

/// Flat scalar state record for the learner under orchestration.
///
/// # Invariants
/// - `rho < 1` always; see [`SystemState::validate`].
/// - `hashes` and `proof_ids` are append-only within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// Expected calibration error in `[0, 1]`.
    pub ece: f64,
    /// Bias ratio, `>= 1` with 1 meaning unbiased.
    pub bias_ratio: f64,
    /// Contractivity proxy in `[0, 1)`.
    pub rho: f64,
    /// Bias-weighted contractivity proxy.
    pub rho_bias: f64,
    /// Aggregate predictive uncertainty.
    pub uncertainty: f64,
    /// Reflexivity / self-calibration score in `[0, 1]`.
    pub sr_score: f64,
    /// Post-score amplification factor, `>= 1`.
    pub caos_post: f64,
    /// Global coherence in `[0, 1]`.
    pub global_coherence: f64,
    /// Last observed performance improvement.
    pub delta_linf: f64,
    /// Out-of-distribution perplexity, `>= 1`.
    pub ppl_ood: f64,
    /// Last observed description-length gain.
    pub mdl_gain: f64,
    /// Trust-region radius in `(0, 0.5]`.
    pub trust_region_radius: f64,
    /// Operator consent flag.
    pub consent: bool,
    /// Ecological consent flag.
    pub eco_ok: bool,
    /// Completed mutation cycles.
    pub cycle_count: u64,
    /// Predicted performance improvement (engine-filled).
    #[serde(default)]
    pub delta_linf_pred: f64,
    /// Predicted description-length gain (engine-filled).
    #[serde(default)]
    pub mdl_gain_pred: f64,
    /// Predicted out-of-distribution perplexity (engine-filled).
    #[serde(default)]
    pub ppl_ood_pred: f64,
    /// Capability flags derived from the last selected candidates.
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Ordered audit hashes accumulated across the cycle.
    #[serde(default)]
    pub hashes: Vec<String>,
    /// Ordered ledger proof references accumulated across the cycle.
    #[serde(default)]
    pub proof_ids: Vec<String>,
}

impl SystemState {
    /// Computes the canonical hash of the state record.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Canonicalization`] when serialization fails.
    pub fn canonical_hash(&self) -> Result<String, HashError> {
        hash_canonical_json(self)
    }

    /// Validates declared attribute bounds.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] naming the first violated bound.
    pub fn validate(&self) -> Result<(), StateError> {
        ensure_unit_interval("ece", self.ece)?;
        ensure_unit_interval("sr_score", self.sr_score)?;
        ensure_unit_interval("global_coherence", self.global_coherence)?;
        if self.bias_ratio < 1.0 {
            return Err(StateError::BelowFloor {
                attribute: "bias_ratio",
                floor: 1.0,
                value: self.bias_ratio,
            });
        }
        if self.caos_post < 1.0 {
            return Err(StateError::BelowFloor {
                attribute: "caos_post",
                floor: 1.0,
                value: self.caos_post,
            });
        }
        if self.ppl_ood < 1.0 {
            return Err(StateError::BelowFloor {
                attribute: "ppl_ood",
                floor: 1.0,
                value: self.ppl_ood,
            });
        }
        if !(self.rho >= 0.0 && self.rho < 1.0) {
            return Err(StateError::ContractivityViolated {
                rho: self.rho,
            });
        }
        if !(self.trust_region_radius > 0.0 && self.trust_region_radius <= 0.5) {
            return Err(StateError::TrustRegionOutOfRange {
                radius: self.trust_region_radius,
            });
        }
        Ok(())
    }
}

/// Ensures a value lies in `[0, 1]`.
fn ensure_unit_interval(attribute: &'static str, value: f64) -> Result<(), StateError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(StateError::OutsideUnitInterval {
            attribute,
            value,
        })
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// State attribute bound violations.
#[derive(Debug, Error)]
pub enum StateError {
    /// Attribute left the `[0, 1]` interval.
    #[error("{attribute} must lie in [0, 1], got {value}")]
    OutsideUnitInterval {
        /// Offending attribute name.
        attribute: &'static str,
        /// Observed value.
        value: f64,
    },
    /// Attribute fell below its declared floor.
    #[error("{attribute} must be >= {floor}, got {value}")]
    BelowFloor {
        /// Offending attribute name.
        attribute: &'static str,
        /// Declared floor.
        floor: f64,
        /// Observed value.
        value: f64,
    },
    /// Contractivity proxy reached or exceeded 1.
    #[error("rho must stay below 1, got {rho}")]
    ContractivityViolated {
        /// Observed contractivity proxy.
        rho: f64,
    },
    /// Trust-region radius outside `(0, 0.5]`.
    #[error("trust_region_radius must lie in (0, 0.5], got {radius}")]
    TrustRegionOutOfRange {
        /// Observed radius.
        radius: f64,
    },
}
