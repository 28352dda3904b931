// crucible-governance/src/gates.rs
// ============================================================================
// Module: Governance Gate Cascade
// Description: Lexicographic, fail-closed promotion gates.
// Purpose: Evaluate Σ-Guard, risk, reflexivity, and performance in strict
//          order.
// Dependencies: crate::config, crucible-core, serde
// ============================================================================

//! ## Overview
//! Gates run in a fixed lexicographic order and are non-compensatory: no
//! strong metric offsets another's failure. Σ-Guard, risk, and reflexivity
//! block; performance records its failures without rejecting. Freeze, RBAC,
//! and canary checks run in the hub around this cascade.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crucible_core::SystemState;
use serde::Deserialize;
use serde::Serialize;

use crate::config::GovernanceConfig;

// ============================================================================
// SECTION: Gate Results
// ============================================================================

/// Result of one gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    /// Stable gate name.
    pub gate: String,
    /// True when no violations were found.
    pub passed: bool,
    /// True when a failure rejects the promotion.
    pub blocking: bool,
    /// Human-readable violation descriptions.
    pub violations: Vec<String>,
}

/// Cascade outcome across all gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    /// Per-gate results in evaluation order.
    pub results: Vec<GateResult>,
    /// True when no blocking gate failed.
    pub passed: bool,
}

impl GateReport {
    /// Returns the result for a named gate.
    #[must_use]
    pub fn gate(&self, name: &str) -> Option<&GateResult> {
        self.results.iter().find(|result| result.gate == name)
    }

    /// Collects violations from blocking gates only.
    #[must_use]
    pub fn blocking_violations(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|result| result.blocking && !result.passed)
            .flat_map(|result| result.violations.iter().cloned())
            .collect()
    }
}

// ============================================================================
// SECTION: Cascade
// ============================================================================

/// Evaluates the Σ-Guard / risk / reflexivity / performance cascade.
///
/// The cascade short-circuits on the first blocking failure: later gates are
/// not evaluated (fail-closed, lexicographic).
#[must_use]
pub fn evaluate(config: &GovernanceConfig, state: &SystemState) -> GateReport {
    let mut results = Vec::with_capacity(4);

    let sigma = sigma_guard(config, state);
    let sigma_failed = !sigma.passed;
    results.push(sigma);
    if sigma_failed {
        return GateReport {
            results,
            passed: false,
        };
    }

    let risk = risk_gate(config, state);
    let risk_failed = !risk.passed;
    results.push(risk);
    if risk_failed {
        return GateReport {
            results,
            passed: false,
        };
    }

    let reflexivity = sr_gate(config, state);
    let reflexivity_failed = !reflexivity.passed;
    results.push(reflexivity);
    if reflexivity_failed {
        return GateReport {
            results,
            passed: false,
        };
    }

    // Performance is advisory: recorded, never rejecting.
    results.push(performance_gate(config, state));
    GateReport {
        results,
        passed: true,
    }
}

/// Evaluates the Σ-Guard ethics bundle.
fn sigma_guard(config: &GovernanceConfig, state: &SystemState) -> GateResult {
    let mut violations = Vec::new();
    if state.ece > config.ethics.ece_max {
        violations.push(format!("ECE={:.4} > {}", state.ece, config.ethics.ece_max));
    }
    if state.rho_bias > config.ethics.rho_bias_max {
        violations.push(format!(
            "rho_bias={:.4} > {}",
            state.rho_bias, config.ethics.rho_bias_max
        ));
    }
    if config.ethics.consent_required && !state.consent {
        violations.push("consent missing".to_string());
    }
    if config.ethics.eco_ok_required && !state.eco_ok {
        violations.push("ecological consent missing".to_string());
    }
    GateResult {
        gate: "sigma_guard".to_string(),
        passed: violations.is_empty(),
        blocking: true,
        violations,
    }
}

/// Evaluates the IR→IC contractivity gate.
fn risk_gate(config: &GovernanceConfig, state: &SystemState) -> GateResult {
    let mut violations = Vec::new();
    if state.rho >= config.risk.rho_max {
        violations.push(format!("rho={:.4} >= {}", state.rho, config.risk.rho_max));
    }
    if state.uncertainty > config.risk.uncertainty_max {
        violations.push(format!(
            "uncertainty={:.4} > {}",
            state.uncertainty, config.risk.uncertainty_max
        ));
    }
    GateResult {
        gate: "risk".to_string(),
        passed: violations.is_empty(),
        blocking: true,
        violations,
    }
}

/// Evaluates the SR reflexivity gate.
fn sr_gate(config: &GovernanceConfig, state: &SystemState) -> GateResult {
    let mut violations = Vec::new();
    if state.sr_score < config.risk.sr_tau {
        violations.push(format!("SR={:.4} < {}", state.sr_score, config.risk.sr_tau));
    }
    GateResult {
        gate: "reflexivity".to_string(),
        passed: violations.is_empty(),
        blocking: true,
        violations,
    }
}

/// Evaluates the non-blocking performance gate.
fn performance_gate(config: &GovernanceConfig, state: &SystemState) -> GateResult {
    let mut violations = Vec::new();
    if state.ppl_ood > config.performance.ppl_ood_max {
        violations.push(format!(
            "ppl_ood={:.2} > {}",
            state.ppl_ood, config.performance.ppl_ood_max
        ));
    }
    if state.delta_linf < config.performance.delta_linf_min {
        violations.push(format!(
            "delta_linf={:.4} < {}",
            state.delta_linf, config.performance.delta_linf_min
        ));
    }
    GateResult {
        gate: "performance".to_string(),
        passed: violations.is_empty(),
        blocking: false,
        violations,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

    use super::*;

    /// Returns a state passing every gate.
    fn healthy_state() -> SystemState {
        SystemState {
            ece: 0.006,
            bias_ratio: 1.02,
            rho: 0.72,
            rho_bias: 1.01,
            uncertainty: 0.18,
            sr_score: 0.85,
            caos_post: 1.3,
            global_coherence: 0.9,
            delta_linf: 0.015,
            ppl_ood: 92.0,
            mdl_gain: 0.02,
            trust_region_radius: 0.12,
            consent: true,
            eco_ok: true,
            cycle_count: 0,
            delta_linf_pred: 0.0,
            mdl_gain_pred: 0.0,
            ppl_ood_pred: 0.0,
            capabilities: crucible_core::Capabilities::default(),
            hashes: Vec::new(),
            proof_ids: Vec::new(),
        }
    }

    #[test]
    fn healthy_state_passes_all_gates() {
        let report = evaluate(&GovernanceConfig::default(), &healthy_state());
        assert!(report.passed);
        assert_eq!(report.results.len(), 4);
    }

    #[test]
    fn ethics_failure_short_circuits_the_cascade() {
        let mut state = healthy_state();
        state.ece = 0.02;
        let report = evaluate(&GovernanceConfig::default(), &state);
        assert!(!report.passed);
        assert_eq!(report.results.len(), 1, "later gates must not run");
        let sigma = report.gate("sigma_guard").expect("sigma guard");
        assert!(sigma.violations.iter().any(|v| v == "ECE=0.0200 > 0.01"));
    }

    #[test]
    fn performance_failure_is_recorded_but_not_blocking() {
        let mut state = healthy_state();
        state.delta_linf = 0.001;
        let report = evaluate(&GovernanceConfig::default(), &state);
        assert!(report.passed, "performance never rejects");
        let perf = report.gate("performance").expect("performance");
        assert!(!perf.passed);
        assert!(report.blocking_violations().is_empty());
    }

    #[test]
    fn missing_consent_is_an_ethics_violation() {
        let mut state = healthy_state();
        state.consent = false;
        let report = evaluate(&GovernanceConfig::default(), &state);
        assert!(!report.passed);
        assert!(
            report
                .gate("sigma_guard")
                .expect("sigma guard")
                .violations
                .iter()
                .any(|v| v.contains("consent"))
        );
    }
}
