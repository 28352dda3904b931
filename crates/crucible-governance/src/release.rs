// crucible-governance/src/release.rs
// ============================================================================
// Module: Release Assembly
// Description: Release manifests, catalogs, and staging-tree construction.
// Purpose: Build the signed, artifact-hashed release structure on disk.
// Dependencies: crate::config, crucible-core, serde, serde_json
// ============================================================================

//! ## Overview
//! A release is a directory: policy pack, evidence pack, knowledge pack,
//! runbook, artifacts, and a signed manifest. Everything packed gets a
//! SHA-256 recorded in the manifest; external-URI artifacts are referenced,
//! never copied. The catalog is the single JSON index the `current` pointer
//! and versioning derive from.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use crucible_core::PlanId;
use crucible_core::Timestamp;
use crucible_core::hashing::hash_bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::gates::GateReport;

// ============================================================================
// SECTION: Canary Input
// ============================================================================

/// Canary decision delivered with a promotion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanaryDecision {
    /// Canary criteria passed.
    Promote,
    /// Canary criteria failed.
    Rollback,
    /// Canary window aged out.
    Timeout,
}

impl CanaryDecision {
    /// Returns the stable string label for the decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Promote => "promote",
            Self::Rollback => "rollback",
            Self::Timeout => "timeout",
        }
    }
}

/// Canary decision plus its telemetry evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryInput {
    /// Window decision.
    pub decision: CanaryDecision,
    /// Free-form canary telemetry.
    #[serde(default)]
    pub telemetry: Value,
}

// ============================================================================
// SECTION: Execution Bundle
// ============================================================================

/// One artifact delivered by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Artifact type label (for example `model`).
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Artifact name.
    pub name: String,
    /// Local file to copy into the release, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// External URI referenced without copying, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Aggregated F3–F6 pipeline output delivered to governance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionBundle {
    /// Pipeline artifacts.
    pub artifacts: Vec<ArtifactSpec>,
    /// Aggregated metrics.
    pub metrics: Value,
    /// Evidence tables copied into the evidence pack.
    pub tables: Vec<PathBuf>,
    /// Evidence plots copied into the evidence pack.
    pub plots: Vec<PathBuf>,
    /// Knowledge indices copied into the knowledge pack.
    pub indices: Vec<PathBuf>,
    /// Knowledge diffs copied into the knowledge pack.
    pub diffs: Vec<PathBuf>,
    /// Impact assessment.
    pub impact: Value,
    /// Dependency report.
    pub dependencies: Value,
    /// Pipeline check results.
    pub checks: Value,
}

// ============================================================================
// SECTION: Release Manifest
// ============================================================================

/// Hashed artifact reference inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestArtifact {
    /// Artifact type label.
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Location: a release-relative path or an external URI.
    pub uri: String,
    /// SHA-256 of the packed bytes; empty for external references.
    pub sha256: String,
}

/// The signed description of one atomic publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseManifest {
    /// Release identifier.
    pub id: String,
    /// Semantic version.
    pub version: String,
    /// Canonical hash of the promoted state.
    pub state_hash: String,
    /// Plan the release came from.
    pub from_plan: String,
    /// Pre-release snapshot archive path.
    pub snap_before: String,
    /// Hashed artifact references.
    pub artifacts: Vec<ManifestArtifact>,
    /// Policy labels applied at promotion.
    pub policies: Value,
    /// Gate and pipeline check results.
    pub checks: Value,
    /// Ledger proofs accumulated during promotion.
    pub worm_events: Vec<String>,
    /// HMAC-SHA256 over the canonical manifest minus this field.
    pub signature: String,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Publishing user.
    pub created_by: String,
}

/// Manifest projection signed and verified (everything minus `signature`).
#[derive(Serialize)]
pub struct SignableManifest<'a> {
    /// Release identifier.
    pub id: &'a str,
    /// Semantic version.
    pub version: &'a str,
    /// Canonical state hash.
    pub state_hash: &'a str,
    /// Source plan.
    pub from_plan: &'a str,
    /// Snapshot path.
    pub snap_before: &'a str,
    /// Hashed artifact references.
    pub artifacts: &'a [ManifestArtifact],
    /// Policy labels.
    pub policies: &'a Value,
    /// Check results.
    pub checks: &'a Value,
    /// Ledger proofs.
    pub worm_events: &'a [String],
    /// Creation timestamp.
    pub created_at: &'a Timestamp,
    /// Publishing user.
    pub created_by: &'a str,
}

impl ReleaseManifest {
    /// Returns the signable projection of this manifest.
    #[must_use]
    pub fn signable(&self) -> SignableManifest<'_> {
        SignableManifest {
            id: &self.id,
            version: &self.version,
            state_hash: &self.state_hash,
            from_plan: &self.from_plan,
            snap_before: &self.snap_before,
            artifacts: &self.artifacts,
            policies: &self.policies,
            checks: &self.checks,
            worm_events: &self.worm_events,
            created_at: &self.created_at,
            created_by: &self.created_by,
        }
    }
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// One catalog row per published release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Release identifier.
    pub id: String,
    /// Semantic version.
    pub version: String,
    /// Source plan.
    pub plan: String,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Publishing user.
    pub created_by: String,
    /// Canonical state hash.
    pub state_hash: String,
}

/// The release index document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    /// Published releases, oldest first.
    pub releases: Vec<CatalogEntry>,
    /// Current release identifier.
    pub current: Option<String>,
    /// Version map: `latest` plus one entry per plan.
    pub versions: BTreeMap<String, String>,
}

impl Catalog {
    /// Reads the catalog document, defaulting to empty when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError`] on unreadable or invalid documents.
    pub fn read(path: &Path) -> Result<Self, ReleaseError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .map_err(|err| ReleaseError::Io(path.display().to_string(), err.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|err| ReleaseError::Parse(path.display().to_string(), err.to_string()))
    }

    /// Writes the catalog atomically (tmp then rename).
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError`] on I/O failure.
    pub fn write(&self, path: &Path) -> Result<(), ReleaseError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|err| ReleaseError::Parse(path.display().to_string(), err.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text)
            .map_err(|err| ReleaseError::Io(tmp.display().to_string(), err.to_string()))?;
        fs::rename(&tmp, path)
            .map_err(|err| ReleaseError::Io(path.display().to_string(), err.to_string()))?;
        Ok(())
    }

    /// Returns the latest published semantic version.
    #[must_use]
    pub fn latest_version(&self) -> Option<&str> {
        self.versions.get("latest").map(String::as_str)
    }
}

// ============================================================================
// SECTION: Versioning
// ============================================================================

/// Semantic version component to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionBump {
    /// Bump the patch component (default).
    #[default]
    Patch,
    /// Bump the minor component.
    Minor,
    /// Bump the major component.
    Major,
}

/// Bumps a semantic version string; an unparsable previous version restarts
/// the series.
#[must_use]
pub fn bump_version(previous: Option<&str>, bump: VersionBump) -> String {
    let (major, minor, patch) = previous
        .and_then(parse_semver)
        .unwrap_or((0, 0, 0));
    match bump {
        VersionBump::Patch => format!("{major}.{minor}.{}", patch + 1),
        VersionBump::Minor => format!("{major}.{}.0", minor + 1),
        VersionBump::Major => format!("{}.0.0", major + 1),
    }
}

/// Parses `major.minor.patch`.
fn parse_semver(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some((major, minor, patch))
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Release assembly failures.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Filesystem failure at a path.
    #[error("release i/o failure at {0}: {1}")]
    Io(String, String),
    /// Document failed to parse or serialize.
    #[error("release parse failure at {0}: {1}")]
    Parse(String, String),
}

// ============================================================================
// SECTION: Staging Assembly
// ============================================================================

/// Builds the staging directory tree and returns the packed-file hashes.
///
/// Layout:
/// `policy_pack/policy_pack.json`, `evidence_pack/…`, `knowledge_pack/…`,
/// `runbook/runbook.md`, `artifacts/<type>_<name>`. The manifest itself is
/// written later, after signing.
///
/// # Errors
///
/// Returns [`ReleaseError`] on any filesystem failure.
pub fn assemble_staging(
    staging: &Path,
    release_id: &str,
    plan_id: &PlanId,
    bundle: &ExecutionBundle,
    canary: &CanaryInput,
    gate_report: &GateReport,
    policies: &Value,
) -> Result<Vec<ManifestArtifact>, ReleaseError> {
    let mut artifacts = Vec::new();

    let policy_dir = staging.join("policy_pack");
    ensure_dir(&policy_dir)?;
    let policy_doc = json!({
        "release": release_id,
        "plan": plan_id.as_str(),
        "policies": policies,
    });
    artifacts.push(write_pack_file(
        staging,
        &policy_dir.join("policy_pack.json"),
        "policy_pack",
        &to_pretty(&policy_doc)?,
    )?);

    let evidence_dir = staging.join("evidence_pack");
    ensure_dir(&evidence_dir)?;
    let evidence_doc = json!({
        "release": release_id,
        "metrics": bundle.metrics,
        "impact": bundle.impact,
        "gates": gate_report,
    });
    artifacts.push(write_pack_file(
        staging,
        &evidence_dir.join("evidence_pack.json"),
        "evidence_pack",
        &to_pretty(&evidence_doc)?,
    )?);
    artifacts.push(write_pack_file(
        staging,
        &evidence_dir.join("canary_telemetry.json"),
        "canary_telemetry",
        &to_pretty(&json!({
            "decision": canary.decision.as_str(),
            "telemetry": canary.telemetry,
        }))?,
    )?);
    for table in &bundle.tables {
        artifacts.push(copy_pack_file(staging, table, &evidence_dir, "evidence_table")?);
    }
    for plot in &bundle.plots {
        artifacts.push(copy_pack_file(staging, plot, &evidence_dir, "evidence_plot")?);
    }

    let knowledge_dir = staging.join("knowledge_pack");
    ensure_dir(&knowledge_dir)?;
    let knowledge_doc = json!({
        "release": release_id,
        "dependencies": bundle.dependencies,
        "checks": bundle.checks,
    });
    artifacts.push(write_pack_file(
        staging,
        &knowledge_dir.join("knowledge_pack.json"),
        "knowledge_pack",
        &to_pretty(&knowledge_doc)?,
    )?);
    for index in &bundle.indices {
        artifacts.push(copy_pack_file(staging, index, &knowledge_dir, "knowledge_index")?);
    }
    for diff in &bundle.diffs {
        artifacts.push(copy_pack_file(staging, diff, &knowledge_dir, "knowledge_diff")?);
    }

    let runbook_dir = staging.join("runbook");
    ensure_dir(&runbook_dir)?;
    let runbook = format!(
        "# Runbook for {release_id}\n\n\
         - Plan: {plan}\n\
         - Rollback: invoke the governance rollback operation with this\n\
           release id; the pre-release snapshot referenced by the manifest\n\
           restores the previous catalog and current pointer.\n\
         - Freeze: toggle the governance freeze operation to halt further\n\
           promotions while investigating.\n",
        plan = plan_id.as_str(),
    );
    artifacts.push(write_pack_file(
        staging,
        &runbook_dir.join("runbook.md"),
        "runbook",
        runbook.as_bytes(),
    )?);

    let artifact_dir = staging.join("artifacts");
    ensure_dir(&artifact_dir)?;
    for spec in &bundle.artifacts {
        if let Some(path) = spec.path.as_ref() {
            let file_name = format!("{}_{}", spec.artifact_type, spec.name);
            let destination = artifact_dir.join(&file_name);
            let bytes = fs::read(path)
                .map_err(|err| ReleaseError::Io(path.display().to_string(), err.to_string()))?;
            fs::write(&destination, &bytes).map_err(|err| {
                ReleaseError::Io(destination.display().to_string(), err.to_string())
            })?;
            artifacts.push(ManifestArtifact {
                artifact_type: spec.artifact_type.clone(),
                uri: format!("artifacts/{file_name}"),
                sha256: hash_bytes(&bytes),
            });
        } else if let Some(uri) = spec.uri.as_ref() {
            // External artifacts are referenced, never copied.
            artifacts.push(ManifestArtifact {
                artifact_type: spec.artifact_type.clone(),
                uri: uri.clone(),
                sha256: String::new(),
            });
        }
    }

    Ok(artifacts)
}

/// Serializes a JSON value with stable formatting.
fn to_pretty(value: &Value) -> Result<Vec<u8>, ReleaseError> {
    serde_json::to_vec_pretty(value)
        .map_err(|err| ReleaseError::Parse("pack document".to_string(), err.to_string()))
}

/// Creates a directory tree.
fn ensure_dir(path: &Path) -> Result<(), ReleaseError> {
    fs::create_dir_all(path)
        .map_err(|err| ReleaseError::Io(path.display().to_string(), err.to_string()))
}

/// Writes one pack file and returns its manifest entry.
fn write_pack_file(
    staging: &Path,
    destination: &Path,
    artifact_type: &str,
    bytes: &[u8],
) -> Result<ManifestArtifact, ReleaseError> {
    fs::write(destination, bytes)
        .map_err(|err| ReleaseError::Io(destination.display().to_string(), err.to_string()))?;
    Ok(ManifestArtifact {
        artifact_type: artifact_type.to_string(),
        uri: destination
            .strip_prefix(staging)
            .unwrap_or(destination)
            .display()
            .to_string(),
        sha256: hash_bytes(bytes),
    })
}

/// Copies one external file into a pack and returns its manifest entry.
fn copy_pack_file(
    staging: &Path,
    source: &Path,
    pack_dir: &Path,
    artifact_type: &str,
) -> Result<ManifestArtifact, ReleaseError> {
    let name = source
        .file_name()
        .map_or_else(|| "unnamed".to_string(), |name| name.to_string_lossy().to_string());
    let destination = pack_dir.join(&name);
    let bytes = fs::read(source)
        .map_err(|err| ReleaseError::Io(source.display().to_string(), err.to_string()))?;
    fs::write(&destination, &bytes)
        .map_err(|err| ReleaseError::Io(destination.display().to_string(), err.to_string()))?;
    Ok(ManifestArtifact {
        artifact_type: artifact_type.to_string(),
        uri: destination
            .strip_prefix(staging)
            .unwrap_or(&destination)
            .display()
            .to_string(),
        sha256: hash_bytes(&bytes),
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

    use super::*;

    #[test]
    fn version_bumps_follow_semver() {
        assert_eq!(bump_version(None, VersionBump::Patch), "0.0.1");
        assert_eq!(bump_version(Some("0.0.1"), VersionBump::Patch), "0.0.2");
        assert_eq!(bump_version(Some("0.3.9"), VersionBump::Minor), "0.4.0");
        assert_eq!(bump_version(Some("1.2.3"), VersionBump::Major), "2.0.0");
        assert_eq!(bump_version(Some("garbage"), VersionBump::Patch), "0.0.1");
    }

    #[test]
    fn catalog_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("catalog.json");
        let mut catalog = Catalog::default();
        catalog.releases.push(CatalogEntry {
            id: "rel_x".to_string(),
            version: "0.0.1".to_string(),
            plan: "plan_demo_001".to_string(),
            created_at: Timestamp::from_rfc3339("2026-08-01T00:00:00Z"),
            created_by: "admin".to_string(),
            state_hash: "abc".to_string(),
        });
        catalog.current = Some("rel_x".to_string());
        catalog.versions.insert("latest".to_string(), "0.0.1".to_string());
        catalog.write(&path).expect("write");

        let loaded = Catalog::read(&path).expect("read");
        assert_eq!(loaded, catalog);
        assert_eq!(loaded.latest_version(), Some("0.0.1"));
    }

    #[test]
    fn missing_catalog_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = Catalog::read(&dir.path().join("catalog.json")).expect("read");
        assert!(catalog.releases.is_empty());
        assert!(catalog.current.is_none());
    }
}
