// crucible-engine/src/bundle.rs
// ============================================================================
// Module: Crucible Mutation Bundle
// Description: Candidate records and bundle archive packaging.
// Purpose: Define the engine's output contract and pack it into one archive.
// Dependencies: crate::surrogate, crucible-core, serde, serde_json, zip
// ============================================================================

//! ## Overview
//! A bundle is the engine's only output: the diverse top-K candidates, the
//! surrogate fit report, and the diversity summary, packed into
//! `<bundle_id>.zip` with one patch file per candidate. The manifest contains
//! no wall-clock material and entry timestamps are pinned, so identical
//! inputs produce byte-identical archives.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use crucible_core::CandidateId;
use crucible_core::hashing::HashError;
use crucible_core::hashing::canonical_json_bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::surrogate::PredictionSet;
use crate::surrogate::SurrogateReport;

// ============================================================================
// SECTION: Candidate Records
// ============================================================================

/// One opaque patch payload targeting a learner path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Target path inside the learner tree.
    pub path: String,
    /// Opaque payload map applied by external workers.
    pub payload: Value,
}

/// Resource ceilings a candidate declares for its evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvCaps {
    /// Memory ceiling in mebibytes.
    pub max_memory_mb: u64,
    /// Wall-clock ceiling in seconds.
    pub max_wall_s: u64,
    /// CPU core ceiling.
    pub cpu_cores: u32,
}

impl Default for EnvCaps {
    fn default() -> Self {
        Self {
            max_memory_mb: 512,
            max_wall_s: 5,
            cpu_cores: 1,
        }
    }
}

/// One scored, sandbox-cleared candidate mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Candidate identifier derived from seeded hash material.
    pub cand_id: CandidateId,
    /// Parent genotype hashes, oldest first.
    pub parent_ids: Vec<String>,
    /// Applied operator labels in order.
    pub op_seq: Vec<String>,
    /// Hybrid distance to the base genotype in `[0, 1]`.
    pub distance_to_base: f64,
    /// Patches applied by external workers.
    pub patches: Vec<Patch>,
    /// Build steps executed before evaluation.
    pub build_steps: Vec<String>,
    /// Declared resource ceilings.
    pub env_caps: EnvCaps,
    /// Per-target predictions with confidence intervals.
    pub pred_metrics: PredictionSet,
    /// Risk estimate in `[0, 1]`.
    pub risk_estimate: f64,
    /// Cost estimate in `[0, 1]`.
    pub cost_estimate: f64,
    /// Latency estimate in milliseconds.
    pub latency_estimate_ms: f64,
    /// Safe-utility score.
    pub score: f64,
    /// Human-facing scoring explanation.
    pub explain: String,
    /// Ledger proof reference for the candidate event.
    ///
    /// Carried in memory for state projection; never packed, because proof
    /// hashes embed wall-clock timestamps and the archive must replay
    /// byte-identically.
    #[serde(skip)]
    pub proof_id: Option<String>,
}

// ============================================================================
// SECTION: Diversity Summary
// ============================================================================

/// Outcome of the diverse top-K selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversitySummary {
    /// Configured minimum pairwise diversity.
    pub min_threshold: f64,
    /// Observed minimum pairwise diversity among selected candidates.
    pub min_pairwise: f64,
    /// Selected candidate count.
    pub selected: usize,
    /// Candidates admitted greedily after the diversity pass fell short.
    pub greedy_fill: usize,
}

// ============================================================================
// SECTION: Mutation Bundle
// ============================================================================

/// The engine's packaged output for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationBundle {
    /// Bundle identifier derived from seeded hash material.
    pub bundle_id: String,
    /// Canonical hash of the driving plan.
    pub plan_hash: String,
    /// Seed the cycle ran under.
    pub seed: u64,
    /// Diverse top-K candidates, best first.
    pub top_k: Vec<Candidate>,
    /// Surrogate fit report.
    pub surrogate_report: SurrogateReport,
    /// Diversity selection summary.
    pub diversity_summary: DiversitySummary,
    /// Projected state updates for downstream gates.
    pub xt_updates: Value,
    /// Packed archive location (set after packaging, not part of the
    /// manifest).
    #[serde(skip)]
    pub artifact_path: PathBuf,
}

/// Canonical manifest projection of a bundle.
#[derive(Serialize)]
struct BundleManifest<'a> {
    /// Bundle identifier.
    bundle_id: &'a str,
    /// Canonical plan hash.
    plan_hash: &'a str,
    /// Cycle seed.
    seed: u64,
    /// Selected candidates.
    top_k: &'a [Candidate],
    /// Surrogate fit report.
    surrogate_report: &'a SurrogateReport,
    /// Diversity selection summary.
    diversity_summary: &'a DiversitySummary,
    /// Projected state updates.
    xt_updates: &'a Value,
}

impl MutationBundle {
    /// Returns the canonical manifest bytes (no wall-clock material).
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Canonicalization`] when serialization fails.
    pub fn manifest_bytes(&self) -> Result<Vec<u8>, HashError> {
        canonical_json_bytes(&BundleManifest {
            bundle_id: &self.bundle_id,
            plan_hash: &self.plan_hash,
            seed: self.seed,
            top_k: &self.top_k,
            surrogate_report: &self.surrogate_report,
            diversity_summary: &self.diversity_summary,
            xt_updates: &self.xt_updates,
        })
    }
}

// ============================================================================
// SECTION: Packaging Errors
// ============================================================================

/// Bundle packaging failures.
#[derive(Debug, Error)]
pub enum BundleError {
    /// Filesystem operation failed.
    #[error("bundle i/o failure: {0}")]
    Io(#[from] std::io::Error),
    /// Archive construction failed.
    #[error("bundle archive failure: {0}")]
    Zip(String),
    /// Canonical serialization failed.
    #[error("bundle serialization failure: {0}")]
    Hash(#[from] HashError),
}

impl From<zip::result::ZipError> for BundleError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Zip(err.to_string())
    }
}

// ============================================================================
// SECTION: Packaging
// ============================================================================

/// Packs a bundle into `<out_dir>/<bundle_id>.zip` via a staging directory.
///
/// The staging tree is written first (manifest plus one patch file per
/// candidate), zipped with pinned entry timestamps, and removed afterwards.
///
/// # Errors
///
/// Returns [`BundleError`] on any filesystem or archive failure; a partial
/// staging tree is removed before returning.
pub fn pack(bundle: &mut MutationBundle, out_dir: &Path) -> Result<PathBuf, BundleError> {
    fs::create_dir_all(out_dir)?;
    let staging = out_dir.join(format!("{}_staging", bundle.bundle_id));
    let result = pack_inner(bundle, out_dir, &staging);
    if staging.exists() {
        let _ = fs::remove_dir_all(&staging);
    }
    result
}

/// Writes the staging tree and the archive.
fn pack_inner(
    bundle: &mut MutationBundle,
    out_dir: &Path,
    staging: &Path,
) -> Result<PathBuf, BundleError> {
    let patches_dir = staging.join("patches");
    fs::create_dir_all(&patches_dir)?;

    let manifest = bundle.manifest_bytes()?;
    fs::write(staging.join("manifest.json"), &manifest)?;

    let mut patch_files = Vec::with_capacity(bundle.top_k.len());
    for candidate in &bundle.top_k {
        let name = format!("{}_patch.json", candidate.cand_id);
        let bytes = canonical_json_bytes(&candidate.patches)?;
        fs::write(patches_dir.join(&name), &bytes)?;
        patch_files.push((name, bytes));
    }

    let archive_path = out_dir.join(format!("{}.zip", bundle.bundle_id));
    let file = File::create(&archive_path)?;
    let mut writer = ZipWriter::new(file);
    // Pinned entry timestamps keep identical inputs byte-identical.
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    writer.start_file("manifest.json", options)?;
    writer.write_all(&manifest)?;
    for (name, bytes) in &patch_files {
        writer.start_file(format!("patches/{name}"), options)?;
        writer.write_all(bytes)?;
    }
    writer.finish()?;

    bundle.artifact_path = archive_path.clone();
    Ok(archive_path)
}
