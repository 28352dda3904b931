// crucible-governance/src/hub.rs
// ============================================================================
// Module: Governance Hub
// Description: Promotion, rollback, and freeze over the release tree.
// Purpose: Run the full gate cascade and publish releases atomically.
// Dependencies: crate::{config, gates, release, scan, signing, snapshot},
//               crucible-core
// ============================================================================

//! ## Overview
//! The hub is the only writer of the release tree. Promotion runs the
//! lexicographic cascade (freeze → RBAC → Σ-Guard → risk → reflexivity →
//! performance → canary), assembles and scans the staging tree, snapshots the
//! pre-release world, signs the manifest, and swaps the `current` pointer in
//! one atomic step. Rollback and freeze are first-class operations, and
//! quarantined trees are moved, never deleted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crucible_core::EventKind;
use crucible_core::HashError;
use crucible_core::Ledger;
use crucible_core::LedgerError;
use crucible_core::Plan;
use crucible_core::SystemState;
use crucible_core::Timestamp;
use crucible_core::hashing::hash_canonical_json;
use crucible_core::hashing::hash_segments;
use crucible_core::time::unix_seconds_now;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::config::ConfigError;
use crate::config::GovernanceConfig;
use crate::gates;
use crate::gates::GateReport;
use crate::release::CanaryDecision;
use crate::release::CanaryInput;
use crate::release::Catalog;
use crate::release::CatalogEntry;
use crate::release::ExecutionBundle;
use crate::release::ReleaseError;
use crate::release::ReleaseManifest;
use crate::release::VersionBump;
use crate::release::assemble_staging;
use crate::release::bump_version;
use crate::scan::ContentScanner;
use crate::scan::ScanError;
use crate::scan::Violation;
use crate::signing::SigningError;
use crate::signing::SigningSecret;
use crate::snapshot;
use crate::snapshot::SnapshotError;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Terminal status of one governance operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    /// Release published atomically.
    Published,
    /// Promotion rejected fail-closed.
    Rejected,
    /// Release quarantined after a content-scan hit.
    Quarantined,
    /// Release rolled back.
    Rollbacked,
    /// Publish failed and was cleaned up.
    Failed,
    /// System frozen.
    Frozen,
    /// System unfrozen.
    Unfrozen,
}

impl PromotionStatus {
    /// Returns the stable string label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Rejected => "rejected",
            Self::Quarantined => "quarantined",
            Self::Rollbacked => "rollbacked",
            Self::Failed => "failed",
            Self::Frozen => "frozen",
            Self::Unfrozen => "unfrozen",
        }
    }
}

/// Structured result of a governance operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionOutcome {
    /// Terminal status.
    pub status: PromotionStatus,
    /// Machine-readable rejection reason, when rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Ledger proof of the terminal event, when one was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worm_proof: Option<String>,
    /// Release identifier, when one was allocated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,
    /// Published version, when published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Gate cascade results, when the cascade ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_results: Option<GateReport>,
    /// Content-scan findings keyed by relative path, when quarantined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations: Option<BTreeMap<String, Vec<Violation>>>,
    /// Free-form operation details.
    #[serde(default)]
    pub details: Value,
}

impl PromotionOutcome {
    /// Builds a bare outcome with a status.
    fn status_only(status: PromotionStatus) -> Self {
        Self {
            status,
            reason: None,
            worm_proof: None,
            release_id: None,
            version: None,
            gate_results: None,
            violations: None,
            details: Value::Null,
        }
    }

    /// Builds a rejection with a reason.
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::status_only(PromotionStatus::Rejected)
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Governance infrastructure failures (distinct from rejections, which are
/// ordinary outcomes).
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Configuration failure.
    #[error("governance config failure: {0}")]
    Config(#[from] ConfigError),
    /// Content scanner failure.
    #[error("governance scan failure: {0}")]
    Scan(#[from] ScanError),
    /// Ledger failure.
    #[error("governance ledger failure: {0}")]
    Ledger(#[from] LedgerError),
    /// Release assembly failure.
    #[error("governance release failure: {0}")]
    Release(#[from] ReleaseError),
    /// Snapshot failure.
    #[error("governance snapshot failure: {0}")]
    Snapshot(#[from] SnapshotError),
    /// Signing failure.
    #[error("governance signing failure: {0}")]
    Signing(#[from] SigningError),
    /// Canonical hashing failure.
    #[error("governance hash failure: {0}")]
    Hash(#[from] HashError),
    /// Filesystem failure at a path.
    #[error("governance i/o failure at {0}: {1}")]
    Io(String, String),
    /// Referenced release does not exist.
    #[error("release not found: {0}")]
    ReleaseNotFound(String),
}

/// Wraps a filesystem failure with its path.
fn io_err(path: &Path, err: &std::io::Error) -> GovernanceError {
    GovernanceError::Io(path.display().to_string(), err.to_string())
}

// ============================================================================
// SECTION: Governance Hub
// ============================================================================

/// The governance hub over one release root.
pub struct GovernanceHub {
    /// Release tree root.
    root: PathBuf,
    /// Merged governance configuration.
    config: GovernanceConfig,
    /// Shared ledger.
    ledger: Arc<Ledger>,
    /// Compiled content scanner.
    scanner: ContentScanner,
    /// Manifest signing secret.
    secret: SigningSecret,
}

impl GovernanceHub {
    /// Opens a hub over a release root, loading configuration and creating
    /// the base directory layout. Incomplete publishes left by a crash are
    /// quarantined during recovery.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError`] on configuration, scanner, or filesystem
    /// failure.
    pub fn open(root: impl Into<PathBuf>, ledger: Arc<Ledger>) -> Result<Self, GovernanceError> {
        let root = root.into();
        let config = GovernanceConfig::load(&root.join("config").join("governance.json"))?;
        let scanner = ContentScanner::new(&config.dlp)?;
        for dir in ["releases", "quarantine", "snapshots", "state"] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|err| io_err(&path, &err))?;
        }
        let hub = Self {
            root,
            config,
            ledger,
            scanner,
            secret: SigningSecret::from_env(),
        };
        hub.recover_incomplete()?;
        Ok(hub)
    }

    /// Replaces the signing secret (tests and key rotation).
    pub fn set_secret(&mut self, secret: SigningSecret) {
        self.secret = secret;
    }

    /// Returns the merged configuration.
    #[must_use]
    pub const fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Returns true when the freeze flag is set.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.freeze_flag_path().exists()
    }

    /// Reads the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError`] on an unreadable catalog.
    pub fn catalog(&self) -> Result<Catalog, GovernanceError> {
        Ok(Catalog::read(&self.catalog_path())?)
    }

    /// Returns the current release identifier, when one is published.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError`] on an unreadable catalog.
    pub fn current_release(&self) -> Result<Option<String>, GovernanceError> {
        Ok(self.catalog()?.current)
    }

    /// Lists published release entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError`] on an unreadable catalog.
    pub fn list_releases(&self) -> Result<Vec<CatalogEntry>, GovernanceError> {
        Ok(self.catalog()?.releases)
    }

    // ------------------------------------------------------------------
    // Promotion
    // ------------------------------------------------------------------

    /// Runs the full promotion cascade and publishes on success.
    ///
    /// Rejections, quarantines, and publish failures are ordinary outcomes;
    /// the `Err` channel is reserved for infrastructure failures.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError`] on ledger, filesystem, or signing
    /// failure.
    pub fn promote(
        &self,
        state: &SystemState,
        plan: &Plan,
        bundle: &ExecutionBundle,
        canary: &CanaryInput,
        user: &str,
        bump: VersionBump,
    ) -> Result<PromotionOutcome, GovernanceError> {
        // 1. Freeze check: rejected without any ledger append; the freeze
        //    event itself was recorded when the flag flipped.
        if self.is_frozen() {
            return Ok(PromotionOutcome::rejected("System frozen"));
        }

        // 2. RBAC.
        if !self.config.rbac.publishers.iter().any(|p| p == user) {
            let proof = self.ledger.record(
                EventKind::ReleaseRejectedGates,
                json!({"gate": "rbac", "user": user, "plan": plan.id.as_str()}),
            )?;
            let mut outcome = PromotionOutcome::rejected("RBAC denied");
            outcome.worm_proof = Some(proof);
            return Ok(outcome);
        }

        // 3-6. Σ-Guard → risk → reflexivity → performance (non-blocking).
        let gate_report = gates::evaluate(&self.config, state);
        if !gate_report.passed {
            let proof = self.ledger.record(
                EventKind::ReleaseRejectedGates,
                json!({
                    "plan": plan.id.as_str(),
                    "violations": gate_report.blocking_violations(),
                }),
            )?;
            let mut outcome = PromotionOutcome::rejected("Gate violations");
            outcome.worm_proof = Some(proof);
            outcome.gate_results = Some(gate_report);
            return Ok(outcome);
        }

        // 7. Canary.
        if canary.decision != CanaryDecision::Promote {
            let proof = self.ledger.record(
                EventKind::ReleaseRejectedCanary,
                json!({
                    "plan": plan.id.as_str(),
                    "decision": canary.decision.as_str(),
                }),
            )?;
            let mut outcome = PromotionOutcome::rejected("Canary rejection");
            outcome.worm_proof = Some(proof);
            outcome.gate_results = Some(gate_report);
            return Ok(outcome);
        }

        self.publish(state, plan, bundle, canary, user, bump, gate_report)
    }

    /// Assembles, scans, snapshots, signs, and atomically publishes.
    #[allow(clippy::too_many_arguments, reason = "publish stage shares cascade context")]
    fn publish(
        &self,
        state: &SystemState,
        plan: &Plan,
        bundle: &ExecutionBundle,
        canary: &CanaryInput,
        user: &str,
        bump: VersionBump,
        gate_report: GateReport,
    ) -> Result<PromotionOutcome, GovernanceError> {
        let created_at = Timestamp::now();
        let bundle_hash = hash_canonical_json(bundle)?;
        let digest = hash_segments(&[
            plan.id.as_str().as_bytes(),
            bundle_hash.as_bytes(),
            created_at.date_str().as_bytes(),
        ]);
        let release_id = format!(
            "rel_{}_{}",
            created_at.date_str(),
            digest.get(..12).unwrap_or(&digest)
        );

        // Stage the release tree.
        let staging = self.root.join("releases").join("_staging").join(&release_id);
        fs::create_dir_all(&staging).map_err(|err| io_err(&staging, &err))?;
        let policies = json!({
            "promotion_policy": plan.promotion_policy,
            "rollback_policy": plan.rollback_policy,
            "retention": self.config.retention,
        });
        let artifacts = assemble_staging(
            &staging,
            &release_id,
            &plan.id,
            bundle,
            canary,
            &gate_report,
            &policies,
        )?;

        // Content scan before sealing; hits quarantine, never publish.
        if self.config.dlp.enabled {
            let findings = self.scanner.scan_directory(&staging)?;
            if !findings.is_empty() {
                let quarantine = self.root.join("quarantine").join(format!("dlp_{release_id}"));
                fs::rename(&staging, &quarantine)
                    .map_err(|err| io_err(&quarantine, &err))?;
                let summary: Vec<Value> = findings
                    .iter()
                    .map(|(path, violations)| json!({"file": path, "violations": violations}))
                    .collect();
                let proof = self.ledger.record(
                    EventKind::ReleaseQuarantinedDlp,
                    json!({"release": release_id, "findings": summary}),
                )?;
                let mut outcome = PromotionOutcome::status_only(PromotionStatus::Quarantined);
                outcome.reason = Some("DLP violations".to_string());
                outcome.worm_proof = Some(proof);
                outcome.release_id = Some(release_id);
                outcome.violations = Some(findings);
                return Ok(outcome);
            }
        }

        // Snapshot the pre-release world before any swap.
        let catalog = self.catalog()?;
        let current_target = catalog.current.as_ref().map(|id| format!("releases/{id}"));
        let snap_path = snapshot::capture(
            &self.root.join("snapshots"),
            &release_id,
            &self.catalog_path(),
            current_target.as_deref(),
        )?;

        let version = bump_version(catalog.latest_version(), bump);
        let state_hash = state.canonical_hash()?;
        let created_proof = self.ledger.record(
            EventKind::ReleaseCreated,
            json!({
                "release": release_id,
                "plan": plan.id.as_str(),
                "version": version,
                "state_hash": state_hash,
            }),
        )?;

        let mut manifest = ReleaseManifest {
            id: release_id.clone(),
            version: version.clone(),
            state_hash,
            from_plan: plan.id.to_string(),
            snap_before: snap_path.display().to_string(),
            artifacts,
            policies,
            checks: json!({
                "gates": gate_report,
                "pipeline": bundle.checks,
                "default_secret": self.secret.is_default(),
            }),
            worm_events: vec![created_proof],
            signature: String::new(),
            created_at,
            created_by: user.to_string(),
        };
        manifest.signature = self.secret.sign(&manifest.signable())?;
        let manifest_bytes = serde_json::to_vec_pretty(&manifest).map_err(|err| {
            GovernanceError::Io("manifest.json".to_string(), err.to_string())
        })?;
        let manifest_path = staging.join("manifest.json");
        fs::write(&manifest_path, &manifest_bytes)
            .map_err(|err| io_err(&manifest_path, &err))?;

        // Atomic publish: staging → .tmp → final, then pointer swap.
        match self.swap_into_place(&staging, &release_id) {
            Ok(()) => {}
            Err(err) => {
                let proof = self.ledger.record(
                    EventKind::ReleaseFailed,
                    json!({"release": release_id, "error": err.to_string()}),
                )?;
                let mut outcome = PromotionOutcome::status_only(PromotionStatus::Failed);
                outcome.reason = Some("Publish failure".to_string());
                outcome.worm_proof = Some(proof);
                outcome.release_id = Some(release_id);
                return Ok(outcome);
            }
        }

        // Catalog update after the swap; recovery quarantines the release
        // directory if a crash lands between the two.
        let mut catalog = catalog;
        catalog.releases.push(CatalogEntry {
            id: release_id.clone(),
            version: version.clone(),
            plan: plan.id.to_string(),
            created_at: manifest.created_at.clone(),
            created_by: user.to_string(),
            state_hash: manifest.state_hash.clone(),
        });
        catalog.current = Some(release_id.clone());
        catalog.versions.insert("latest".to_string(), version.clone());
        catalog.versions.insert(plan.id.to_string(), version.clone());
        catalog.write(&self.catalog_path())?;

        let published_proof = self.ledger.record(
            EventKind::ReleasePublished,
            json!({
                "release": release_id,
                "version": version,
                "plan": plan.id.as_str(),
                "signed_with_default_secret": self.secret.is_default(),
            }),
        )?;

        let mut outcome = PromotionOutcome::status_only(PromotionStatus::Published);
        outcome.worm_proof = Some(published_proof);
        outcome.release_id = Some(release_id);
        outcome.version = Some(version);
        outcome.gate_results = Some(gate_report);
        if self.secret.is_default() {
            outcome.details = json!({
                "warning": "manifest signed with the development default secret",
            });
        }
        Ok(outcome)
    }

    /// Moves staging into the live tree and retargets the current pointer.
    fn swap_into_place(&self, staging: &Path, release_id: &str) -> Result<(), GovernanceError> {
        let releases = self.root.join("releases");
        let tmp = releases.join(format!("{release_id}.tmp"));
        let live = releases.join(release_id);

        let result = (|| -> Result<(), GovernanceError> {
            fs::rename(staging, &tmp).map_err(|err| io_err(&tmp, &err))?;
            fs::rename(&tmp, &live).map_err(|err| io_err(&live, &err))?;
            point_current(&releases, release_id)?;
            Ok(())
        })();
        if result.is_err() {
            // A failed publish leaves nothing half-live.
            let _ = fs::remove_dir_all(&tmp);
            let _ = fs::remove_dir_all(staging);
        }
        result
    }

    // ------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------

    /// Rolls a published release back to its pre-release snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError`] on infrastructure failure or an unknown
    /// release.
    pub fn rollback(
        &self,
        release_id: &str,
        reason: &str,
        user: &str,
    ) -> Result<PromotionOutcome, GovernanceError> {
        if !self.config.rbac.approvers.iter().any(|a| a == user) {
            let proof = self.ledger.record(
                EventKind::ReleaseRejectedGates,
                json!({"gate": "rbac", "operation": "rollback", "user": user}),
            )?;
            let mut outcome = PromotionOutcome::rejected("RBAC denied");
            outcome.worm_proof = Some(proof);
            return Ok(outcome);
        }

        let live = self.root.join("releases").join(release_id);
        if !live.exists() {
            return Err(GovernanceError::ReleaseNotFound(release_id.to_string()));
        }
        let manifest_text = fs::read_to_string(live.join("manifest.json"))
            .map_err(|err| io_err(&live.join("manifest.json"), &err))?;
        let manifest: ReleaseManifest = serde_json::from_str(&manifest_text).map_err(|err| {
            GovernanceError::Io("manifest.json".to_string(), err.to_string())
        })?;

        // Quarantine the release tree; never delete.
        let quarantine = self
            .root
            .join("quarantine")
            .join(format!("rollback_{release_id}_{}", unix_seconds_now()));
        fs::rename(&live, &quarantine).map_err(|err| io_err(&quarantine, &err))?;

        // Restore the pre-release snapshot, then sanitize the catalog.
        let snap_path = PathBuf::from(&manifest.snap_before);
        let restored = if snap_path.exists() {
            Some(snapshot::restore(&snap_path, &self.catalog_path())?)
        } else {
            None
        };

        let mut catalog = self.catalog()?;
        catalog.releases.retain(|entry| entry.id != release_id);
        let tail = catalog.releases.last().map(|entry| entry.id.clone());
        catalog.current = tail.clone();
        if let Some(entry) = catalog.releases.last() {
            catalog.versions.insert("latest".to_string(), entry.version.clone());
        } else {
            catalog.versions.remove("latest");
        }
        catalog.write(&self.catalog_path())?;

        // Re-point or remove the current pointer.
        let releases = self.root.join("releases");
        let restored_target = restored.and_then(|snapshot| snapshot.current_target);
        let target = tail.or_else(|| {
            restored_target.and_then(|target| {
                target.strip_prefix("releases/").map(str::to_string)
            })
        });
        match target {
            Some(target) => point_current(&releases, &target)?,
            None => {
                let link = releases.join("current");
                let _ = fs::remove_file(&link);
            }
        }

        let proof = self.ledger.record(
            EventKind::ReleaseRollbacked,
            json!({
                "release": release_id,
                "reason": reason,
                "user": user,
                "quarantine": quarantine.display().to_string(),
            }),
        )?;
        let mut outcome = PromotionOutcome::status_only(PromotionStatus::Rollbacked);
        outcome.worm_proof = Some(proof);
        outcome.release_id = Some(release_id.to_string());
        outcome.details = json!({"quarantine": quarantine.display().to_string()});
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Freeze
    // ------------------------------------------------------------------

    /// Sets or clears the freeze flag.
    ///
    /// # Errors
    ///
    /// Returns [`GovernanceError`] on filesystem or ledger failure.
    pub fn freeze(&self, on: bool, user: &str) -> Result<PromotionOutcome, GovernanceError> {
        let flag = self.freeze_flag_path();
        if on {
            fs::write(&flag, b"frozen\n").map_err(|err| io_err(&flag, &err))?;
            let proof = self
                .ledger
                .record(EventKind::SystemFrozen, json!({"user": user}))?;
            let mut outcome = PromotionOutcome::status_only(PromotionStatus::Frozen);
            outcome.worm_proof = Some(proof);
            Ok(outcome)
        } else {
            if flag.exists() {
                fs::remove_file(&flag).map_err(|err| io_err(&flag, &err))?;
            }
            let proof = self
                .ledger
                .record(EventKind::SystemUnfrozen, json!({"user": user}))?;
            let mut outcome = PromotionOutcome::status_only(PromotionStatus::Unfrozen);
            outcome.worm_proof = Some(proof);
            Ok(outcome)
        }
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Quarantines releases left without a catalog row by a crash between
    /// the publish swap and the catalog update, and drops stray `.tmp`
    /// trees.
    fn recover_incomplete(&self) -> Result<(), GovernanceError> {
        let releases = self.root.join("releases");
        let catalog = self.catalog()?;
        let entries = match fs::read_dir(&releases) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "current" || name == "_staging" {
                continue;
            }
            let path = entry.path();
            if name.ends_with(".tmp") {
                let _ = fs::remove_dir_all(&path);
                continue;
            }
            if !path.is_dir() {
                continue;
            }
            if !catalog.releases.iter().any(|release| release.id == name) {
                let quarantine =
                    self.root.join("quarantine").join(format!("incomplete_{name}"));
                fs::rename(&path, &quarantine)
                    .map_err(|err| io_err(&quarantine, &err))?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    /// Returns the catalog document path.
    fn catalog_path(&self) -> PathBuf {
        self.root.join("catalog.json")
    }

    /// Returns the freeze flag path.
    fn freeze_flag_path(&self) -> PathBuf {
        self.root.join("state").join("freeze.flag")
    }
}

// ============================================================================
// SECTION: Current Pointer
// ============================================================================

/// Atomically retargets `releases/current` at a release directory.
#[cfg(unix)]
fn point_current(releases: &Path, release_id: &str) -> Result<(), GovernanceError> {
    let link = releases.join("current");
    let staged = releases.join(".current.tmp");
    let _ = fs::remove_file(&staged);
    std::os::unix::fs::symlink(release_id, &staged).map_err(|err| io_err(&staged, &err))?;
    fs::rename(&staged, &link).map_err(|err| io_err(&link, &err))?;
    Ok(())
}

/// Atomically retargets `releases/current` via a pointer file.
#[cfg(not(unix))]
fn point_current(releases: &Path, release_id: &str) -> Result<(), GovernanceError> {
    let link = releases.join("current");
    let staged = releases.join(".current.tmp");
    fs::write(&staged, release_id).map_err(|err| io_err(&staged, &err))?;
    fs::rename(&staged, &link).map_err(|err| io_err(&link, &err))?;
    Ok(())
}
