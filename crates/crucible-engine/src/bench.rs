// crucible-engine/src/bench.rs
// ============================================================================
// Module: Crucible Micro-Benchmark
// Description: Deterministic cost/latency/risk heuristic for candidates.
// Purpose: Estimate execution characteristics from concrete parameters and
//          acquisition signals without running anything.
// Dependencies: crate::genespace, crucible-core, serde
// ============================================================================

//! ## Overview
//! The micro-benchmark is a pure function from a candidate's concrete
//! parameter map and the cycle's acquisition signals to
//! `(latency_ms, cost, risk)`. Latency is monotonically non-decreasing in
//! retrieval depth and batch size; quantization and pruning trade latency
//! for risk; weak acquisition evidence uplifts latency and risk
//! multiplicatively. Cost and risk are clamped into `[0, 1]`.
//!
//! The coefficients are inherited defaults, not derived from an external
//! definition; they are exposed as configuration so deployments can
//! recalibrate without a code change.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crucible_core::AcquisitionReport;
use serde::Deserialize;
use serde::Serialize;

use crate::genespace::ParamValue;

// ============================================================================
// SECTION: Benchmark Profile
// ============================================================================

/// Tunable micro-benchmark coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchProfile {
    /// Baseline latency in milliseconds.
    pub base_latency_ms: f64,
    /// Latency added per retrieval hit.
    pub latency_per_topk: f64,
    /// Latency added per batch element.
    pub latency_per_batch: f64,
    /// Latency added per normalized chunk-size unit.
    pub latency_per_chunk_unit: f64,
    /// Latency multiplier applied when quantization is on.
    pub quant_latency_factor: f64,
    /// Latency multiplier applied when pruning is on.
    pub pruning_latency_factor: f64,
    /// Baseline abstract cost.
    pub base_cost: f64,
    /// Cost added per batch element.
    pub cost_per_batch: f64,
    /// Cost added per retrieval hit.
    pub cost_per_topk: f64,
    /// Baseline risk.
    pub base_risk: f64,
    /// Risk added per unit of normalized learning-rate displacement.
    pub risk_per_lr: f64,
    /// Risk added per unit of temperature.
    pub risk_per_temperature: f64,
    /// Risk penalty when quantization is on.
    pub quant_risk_penalty: f64,
    /// Risk penalty when pruning is on.
    pub pruning_risk_penalty: f64,
    /// Latency uplift coefficient on weak novelty.
    pub novelty_latency_uplift: f64,
    /// Risk uplift coefficient on weak recall.
    pub recall_risk_uplift: f64,
    /// Baseline prediction used before the surrogate has history.
    pub prediction_baseline: f64,
    /// Baseline out-of-distribution perplexity prediction.
    pub ppl_baseline: f64,
}

impl Default for BenchProfile {
    fn default() -> Self {
        Self {
            base_latency_ms: 5.0,
            latency_per_topk: 0.01,
            latency_per_batch: 0.05,
            latency_per_chunk_unit: 1.0,
            quant_latency_factor: 0.9,
            pruning_latency_factor: 0.92,
            base_cost: 0.05,
            cost_per_batch: 0.004,
            cost_per_topk: 0.002,
            base_risk: 0.05,
            risk_per_lr: 0.3,
            risk_per_temperature: 0.1,
            quant_risk_penalty: 0.08,
            pruning_risk_penalty: 0.06,
            novelty_latency_uplift: 0.2,
            recall_risk_uplift: 0.15,
            prediction_baseline: 0.05,
            ppl_baseline: 100.0,
        }
    }
}

// ============================================================================
// SECTION: Benchmark Result
// ============================================================================

/// Deterministic execution estimate for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchResult {
    /// Estimated latency in milliseconds.
    pub latency_ms: f64,
    /// Estimated abstract cost in `[0, 1]`.
    pub cost: f64,
    /// Estimated risk in `[0, 1]`.
    pub risk: f64,
}

// ============================================================================
// SECTION: Simulation
// ============================================================================

/// Runs the micro-benchmark over a concrete parameter map.
#[must_use]
pub fn simulate(
    profile: &BenchProfile,
    params: &BTreeMap<String, ParamValue>,
    acq: &AcquisitionReport,
) -> BenchResult {
    let topk = float_param(params, "rag_topk");
    let batch = float_param(params, "batch");
    let chunk = float_param(params, "rag_chunk_size") / 2_048.0;
    let learning_rate = float_param(params, "learning_rate");
    let temperature = float_param(params, "temperature");
    let quant = flag_param(params, "quant");
    let pruning = flag_param(params, "pruning");

    let mut latency_ms = profile.base_latency_ms
        + profile.latency_per_topk * topk
        + profile.latency_per_batch * batch
        + profile.latency_per_chunk_unit * chunk;
    if quant {
        latency_ms *= profile.quant_latency_factor;
    }
    if pruning {
        latency_ms *= profile.pruning_latency_factor;
    }
    latency_ms *= 1.0 + profile.novelty_latency_uplift * (1.0 - acq.novelty_sim);

    let cost =
        profile.base_cost + profile.cost_per_batch * batch + profile.cost_per_topk * topk;

    // Learning-rate risk grows with displacement from the range floor.
    let lr_unit = (learning_rate / 1e-3).clamp(0.0, 1.0);
    let mut risk = profile.base_risk
        + profile.risk_per_lr * lr_unit
        + profile.risk_per_temperature * temperature;
    if quant {
        risk += profile.quant_risk_penalty;
    }
    if pruning {
        risk += profile.pruning_risk_penalty;
    }
    risk *= 1.0 + profile.recall_risk_uplift * (1.0 - acq.rag_recall);

    BenchResult {
        latency_ms: latency_ms.max(0.0),
        cost: cost.clamp(0.0, 1.0),
        risk: risk.clamp(0.0, 1.0),
    }
}

// ============================================================================
// SECTION: Parameter Access
// ============================================================================

/// Reads a numeric parameter, defaulting to zero when absent.
fn float_param(params: &BTreeMap<String, ParamValue>, name: &str) -> f64 {
    params.get(name).and_then(ParamValue::as_f64).unwrap_or(0.0)
}

/// Reads a flag parameter, defaulting to false when absent.
fn flag_param(params: &BTreeMap<String, ParamValue>, name: &str) -> bool {
    matches!(params.get(name), Some(ParamValue::Flag(true)))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

    use super::*;

    /// Builds a parameter map with the provided retrieval depth and batch.
    fn params_with(topk: i64, batch: i64) -> BTreeMap<String, ParamValue> {
        let mut params = BTreeMap::new();
        params.insert("rag_topk".to_string(), ParamValue::Int(topk));
        params.insert("batch".to_string(), ParamValue::Int(batch));
        params.insert("learning_rate".to_string(), ParamValue::Float(1e-4));
        params.insert("temperature".to_string(), ParamValue::Float(0.7));
        params
    }

    #[test]
    fn latency_is_monotone_in_topk_and_batch() {
        let profile = BenchProfile::default();
        let acq = AcquisitionReport::neutral("plan");
        let small = simulate(&profile, &params_with(2, 4), &acq);
        let deeper = simulate(&profile, &params_with(16, 4), &acq);
        let wider = simulate(&profile, &params_with(2, 64), &acq);
        assert!(deeper.latency_ms >= small.latency_ms);
        assert!(wider.latency_ms >= small.latency_ms);
    }

    #[test]
    fn weak_recall_uplifts_risk() {
        let profile = BenchProfile::default();
        let mut weak = AcquisitionReport::neutral("plan");
        weak.rag_recall = 0.2;
        let strong = AcquisitionReport::neutral("plan");
        let params = params_with(4, 8);
        let weak_risk = simulate(&profile, &params, &weak).risk;
        let strong_risk = simulate(&profile, &params, &strong).risk;
        assert!(weak_risk > strong_risk);
    }

    #[test]
    fn quantization_trades_latency_for_risk() {
        let profile = BenchProfile::default();
        let acq = AcquisitionReport::neutral("plan");
        let mut quantized = params_with(4, 8);
        quantized.insert("quant".to_string(), ParamValue::Flag(true));
        let plain = simulate(&profile, &params_with(4, 8), &acq);
        let quant = simulate(&profile, &quantized, &acq);
        assert!(quant.latency_ms < plain.latency_ms);
        assert!(quant.risk > plain.risk);
    }

    #[test]
    fn outputs_are_clamped() {
        let profile = BenchProfile::default();
        let mut acq = AcquisitionReport::neutral("plan");
        acq.rag_recall = 0.0;
        let mut params = params_with(32, 128);
        params.insert("learning_rate".to_string(), ParamValue::Float(1e-3));
        params.insert("temperature".to_string(), ParamValue::Float(2.0));
        params.insert("quant".to_string(), ParamValue::Flag(true));
        params.insert("pruning".to_string(), ParamValue::Flag(true));
        let result = simulate(&profile, &params, &acq);
        assert!(result.cost <= 1.0);
        assert!(result.risk <= 1.0);
    }
}
