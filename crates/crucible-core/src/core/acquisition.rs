// crucible-core/src/core/acquisition.rs
// ============================================================================
// Module: Crucible Acquisition Report
// Description: Evidence summary produced by the external acquisition stage.
// Purpose: Define the read-only F3 output consumed by the mutation engine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The acquisition stage (out of scope for the control plane) summarizes what
//! it learned into this report. The engine treats it as read-only evidence:
//! novelty and recall feed the micro-benchmark uplifts, anchor questions seed
//! designated flag genes, and the synthesis excerpt perturbs float genes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Acquisition Report
// ============================================================================

/// Maximum anchor questions retained in a report.
pub const MAX_ANCHOR_QUESTIONS: usize = 10;

/// Evidence summary produced by the F3 acquisition stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionReport {
    /// Novelty similarity in `[0, 1]` (1 means nothing new was found).
    pub novelty_sim: f64,
    /// Retrieval recall in `[0, 1]`.
    pub rag_recall: f64,
    /// Optional location of the synthesis text artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_path: Option<String>,
    /// Optional inline synthesis excerpt used for gene hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_excerpt: Option<String>,
    /// Anchor questions, truncated to [`MAX_ANCHOR_QUESTIONS`].
    #[serde(default)]
    pub questions: Vec<String>,
    /// Number of source documents consulted.
    #[serde(default)]
    pub n_docs: u64,
    /// Number of retrieval chunks consulted.
    #[serde(default)]
    pub n_chunks: u64,
    /// Canonical hash of the driving plan.
    pub plan_hash: String,
    /// Ledger proof reference for the acquisition round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_id: Option<String>,
}

impl AcquisitionReport {
    /// Returns a neutral report for cycles that ran without acquisition.
    #[must_use]
    pub fn neutral(plan_hash: impl Into<String>) -> Self {
        Self {
            novelty_sim: 1.0,
            rag_recall: 1.0,
            synthesis_path: None,
            synthesis_excerpt: None,
            questions: Vec::new(),
            n_docs: 0,
            n_chunks: 0,
            plan_hash: plan_hash.into(),
            proof_id: None,
        }
    }

    /// Returns the anchor questions truncated to the retention cap.
    #[must_use]
    pub fn anchor_questions(&self) -> &[String] {
        let cap = self.questions.len().min(MAX_ANCHOR_QUESTIONS);
        &self.questions[..cap]
    }
}
