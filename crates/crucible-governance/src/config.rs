// crucible-governance/src/config.rs
// ============================================================================
// Module: Governance Configuration
// Description: Threshold and policy configuration with deep-merged overrides.
// Purpose: Load governance.json over built-in defaults, user keys winning.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Governance thresholds come from `config/governance.json` deep-merged over
//! built-in defaults: objects merge recursively and user leaves win. The
//! merge operates on raw JSON values before deserialization so partial
//! override files stay small.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Section Types
// ============================================================================

/// Σ-Guard ethics thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EthicsConfig {
    /// Maximum expected calibration error.
    pub ece_max: f64,
    /// Maximum bias-weighted contractivity.
    pub rho_bias_max: f64,
    /// Whether operator consent is required.
    pub consent_required: bool,
    /// Whether ecological consent is required.
    pub eco_ok_required: bool,
}

impl Default for EthicsConfig {
    fn default() -> Self {
        Self {
            ece_max: 0.01,
            rho_bias_max: 1.05,
            consent_required: true,
            eco_ok_required: true,
        }
    }
}

/// IR→IC and reflexivity thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Contractivity ceiling.
    pub rho_max: f64,
    /// Reflexivity gate threshold.
    pub sr_tau: f64,
    /// Aggregate uncertainty ceiling.
    pub uncertainty_max: f64,
    /// Whether a violation should also signal a kill.
    pub kill_on_violation: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            rho_max: 0.95,
            sr_tau: 0.80,
            uncertainty_max: 0.30,
            kill_on_violation: false,
        }
    }
}

/// Performance thresholds (non-blocking gate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Out-of-distribution perplexity ceiling.
    pub ppl_ood_max: f64,
    /// Minimum observed improvement.
    pub delta_linf_min: f64,
    /// Minimum efficiency score.
    pub efficiency_min: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            ppl_ood_max: 100.0,
            delta_linf_min: 0.01,
            efficiency_min: 0.0,
        }
    }
}

/// Trust-region sizing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustRegionConfig {
    /// Current radius.
    pub radius: f64,
    /// Radius floor.
    pub min: f64,
    /// Radius ceiling.
    pub max: f64,
    /// Growth factor on success.
    pub grow_factor: f64,
    /// Shrink factor on failure.
    pub shrink_factor: f64,
}

impl Default for TrustRegionConfig {
    fn default() -> Self {
        Self {
            radius: 0.10,
            min: 0.02,
            max: 0.50,
            grow_factor: 1.10,
            shrink_factor: 0.90,
        }
    }
}

/// Release retention policy (consumed by external housekeeping).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days a release is retained.
    pub days: u32,
    /// Days before archival.
    pub archive_after: u32,
    /// Whether archived releases are compressed.
    pub compress: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: 90,
            archive_after: 30,
            compress: true,
        }
    }
}

/// Role-based access control lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    /// Users allowed to publish releases.
    pub publishers: Vec<String>,
    /// Users allowed to approve rollbacks.
    pub approvers: Vec<String>,
    /// Whether publish and approve must be different users.
    pub four_eyes: bool,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            publishers: vec!["admin".to_string()],
            approvers: vec!["admin".to_string()],
            four_eyes: false,
        }
    }
}

/// DLP scanner policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DlpConfig {
    /// Whether the content scan runs before sealing.
    pub enabled: bool,
    /// Label-to-regex pattern table merged over the built-in set.
    pub patterns: BTreeMap<String, String>,
}

impl Default for DlpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: BTreeMap::new(),
        }
    }
}

// ============================================================================
// SECTION: Governance Configuration
// ============================================================================

/// Complete governance configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Σ-Guard ethics thresholds.
    pub ethics: EthicsConfig,
    /// Risk and reflexivity thresholds.
    pub risk: RiskConfig,
    /// Performance thresholds.
    pub performance: PerformanceConfig,
    /// Trust-region sizing policy.
    pub trust_region: TrustRegionConfig,
    /// Retention policy.
    pub retention: RetentionConfig,
    /// Access control lists.
    pub rbac: RbacConfig,
    /// DLP scanner policy.
    pub dlp: DlpConfig,
}

impl GovernanceConfig {
    /// Loads the configuration file merged over defaults.
    ///
    /// A missing file yields the defaults unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable or invalid configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.display().to_string(), err.to_string()))?;
        let overlay: Value = serde_json::from_str(&text)
            .map_err(|err| ConfigError::Parse(path.display().to_string(), err.to_string()))?;
        Self::from_overlay(overlay)
    }

    /// Builds the configuration from a raw overlay value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the merged document is invalid.
    pub fn from_overlay(overlay: Value) -> Result<Self, ConfigError> {
        let defaults = serde_json::to_value(Self::default())
            .map_err(|err| ConfigError::Parse("defaults".to_string(), err.to_string()))?;
        let merged = deep_merge(defaults, overlay);
        let config: Self = serde_json::from_value(merged)
            .map_err(|err| ConfigError::Parse("merged".to_string(), err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates threshold sanity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0 < self.ethics.ece_max && self.ethics.ece_max <= 1.0) {
            return Err(ConfigError::Invalid("ethics.ece_max must lie in (0, 1]".to_string()));
        }
        if !(0.0 < self.risk.rho_max && self.risk.rho_max < 1.0) {
            return Err(ConfigError::Invalid("risk.rho_max must lie in (0, 1)".to_string()));
        }
        if !(0.0..=1.0).contains(&self.risk.sr_tau) {
            return Err(ConfigError::Invalid("risk.sr_tau must lie in [0, 1]".to_string()));
        }
        if self.trust_region.min > self.trust_region.max {
            return Err(ConfigError::Invalid(
                "trust_region.min must not exceed trust_region.max".to_string(),
            ));
        }
        if self.rbac.publishers.is_empty() {
            return Err(ConfigError::Invalid("rbac.publishers must not be empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Deep Merge
// ============================================================================

/// Recursively merges `overlay` over `base`; overlay leaves win.
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("config read failure at {0}: {1}")]
    Io(String, String),
    /// Configuration document failed to parse or deserialize.
    #[error("config parse failure at {0}: {1}")]
    Parse(String, String),
    /// Configuration thresholds are inconsistent.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_validate() {
        GovernanceConfig::default().validate().expect("valid defaults");
    }

    #[test]
    fn overlay_wins_on_leaves_and_preserves_siblings() {
        let config = GovernanceConfig::from_overlay(json!({
            "ethics": {"ece_max": 0.02},
            "rbac": {"publishers": ["admin", "release-bot"]}
        }))
        .expect("merge");
        assert!((config.ethics.ece_max - 0.02).abs() < f64::EPSILON);
        assert!((config.ethics.rho_bias_max - 1.05).abs() < f64::EPSILON, "sibling kept");
        assert_eq!(config.rbac.publishers.len(), 2);
        assert!((config.risk.sr_tau - 0.80).abs() < f64::EPSILON, "untouched section kept");
    }

    #[test]
    fn invalid_overlay_is_rejected() {
        let result = GovernanceConfig::from_overlay(json!({"risk": {"rho_max": 1.5}}));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn dlp_patterns_merge_by_label() {
        let config = GovernanceConfig::from_overlay(json!({
            "dlp": {"patterns": {"internal_ticket": "CRU-[0-9]{4}"}}
        }))
        .expect("merge");
        assert_eq!(
            config.dlp.patterns.get("internal_ticket").map(String::as_str),
            Some("CRU-[0-9]{4}")
        );
    }
}
