// crucible-engine/src/surrogate.rs
// ============================================================================
// Module: Crucible Surrogate Predictors
// Description: Per-target regressors with confidence intervals.
// Purpose: Predict candidate outcomes from features using capped history.
// Dependencies: crate::rng, serde, thiserror
// ============================================================================

//! ## Overview
//! Three regressors, one per target: predicted improvement, predicted
//! description-length gain, and predicted out-of-distribution perplexity.
//! The surrogate capability is polymorphic over `{Mean, Ridge, Boost}`,
//! selected by configuration; `Mean` doubles as the degenerate fallback when
//! history is thin. Training history is FIFO-capped and refit per cycle.
//! Confidence intervals come from bootstrap refits when the history permits,
//! otherwise a fixed relative band.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::rng::DetRng;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Surrogate model variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SurrogateKind {
    /// Historical mean (degenerate fallback).
    Mean,
    /// Ridge regression over scaled features.
    #[default]
    Ridge,
    /// Gradient-boosted depth-1 stumps.
    Boost,
}

impl SurrogateKind {
    /// Returns the stable string label for the variant.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Ridge => "ridge",
            Self::Boost => "boost",
        }
    }
}

/// Surrogate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateConfig {
    /// Selected model variant.
    pub kind: SurrogateKind,
    /// FIFO cap on retained training samples.
    pub history_size: usize,
    /// Minimum samples before leaving the mean fallback.
    pub min_fit_samples: usize,
    /// Minimum samples before bootstrapping intervals.
    pub bootstrap_min_samples: usize,
    /// Maximum bootstrap resamples.
    pub bootstrap_resamples: usize,
    /// Relative half-width of the fallback interval.
    pub fallback_ci_frac: f64,
    /// Ridge L2 damping.
    pub ridge_lambda: f64,
    /// Boosting rounds for the full fit.
    pub boost_rounds: usize,
    /// Boosting rounds for bootstrap refits.
    pub boost_rounds_bootstrap: usize,
    /// Boosting learning rate.
    pub boost_learning_rate: f64,
}

impl Default for SurrogateConfig {
    fn default() -> Self {
        Self {
            kind: SurrogateKind::Ridge,
            history_size: 1_000,
            min_fit_samples: 5,
            bootstrap_min_samples: 10,
            bootstrap_resamples: 50,
            fallback_ci_frac: 0.15,
            ridge_lambda: 1.0,
            boost_rounds: 40,
            boost_rounds_bootstrap: 10,
            boost_learning_rate: 0.1,
        }
    }
}

// ============================================================================
// SECTION: Targets and Samples
// ============================================================================

/// Prediction targets, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Predicted performance improvement.
    DeltaLinf,
    /// Predicted description-length gain.
    MdlGain,
    /// Predicted out-of-distribution perplexity.
    PplOod,
}

impl Target {
    /// All targets in report order.
    pub const ALL: [Self; 3] = [Self::DeltaLinf, Self::MdlGain, Self::PplOod];

    /// Returns the stable string label for the target.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeltaLinf => "delta_linf_hat",
            Self::MdlGain => "mdl_gain_hat",
            Self::PplOod => "ppl_ood_hat",
        }
    }
}

/// One observed training sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    /// Feature vector in the fixed extraction order.
    pub features: Vec<f64>,
    /// Observed improvement.
    pub delta_linf: f64,
    /// Observed description-length gain.
    pub mdl_gain: f64,
    /// Observed out-of-distribution perplexity.
    pub ppl_ood: f64,
}

impl TrainingSample {
    /// Returns the sample's value for a target.
    #[must_use]
    pub const fn value_for(&self, target: Target) -> f64 {
        match target {
            Target::DeltaLinf => self.delta_linf,
            Target::MdlGain => self.mdl_gain,
            Target::PplOod => self.ppl_ood,
        }
    }
}

/// Baseline predictions used before the surrogate has history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baselines {
    /// Improvement baseline.
    pub delta_linf: f64,
    /// Description-length baseline.
    pub mdl_gain: f64,
    /// Perplexity baseline.
    pub ppl_ood: f64,
}

// ============================================================================
// SECTION: Reports and Predictions
// ============================================================================

/// Fit quality for one target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    /// Samples used for the fit.
    pub n_samples: usize,
    /// Coefficient of determination on the training set.
    pub r2: f64,
    /// Mean absolute error on the training set.
    pub mae: f64,
}

/// Fit report across all targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateReport {
    /// Active model variant label.
    pub kind: String,
    /// Improvement target report.
    pub delta_linf: TargetReport,
    /// Description-length target report.
    pub mdl_gain: TargetReport,
    /// Perplexity target report.
    pub ppl_ood: TargetReport,
}

/// Point estimate with a 95% confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Point estimate.
    pub point: f64,
    /// Lower interval bound.
    pub ci_lo: f64,
    /// Upper interval bound.
    pub ci_hi: f64,
}

/// Predictions across all targets, clamped into their legal ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionSet {
    /// Predicted improvement (`>= 0`).
    pub delta_linf: Prediction,
    /// Predicted description-length gain (`>= 0`).
    pub mdl_gain: Prediction,
    /// Predicted perplexity (`>= 1`).
    pub ppl_ood: Prediction,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Surrogate failures.
#[derive(Debug, Error)]
pub enum SurrogateError {
    /// Feature vector length diverged from the fitted width.
    #[error("feature width mismatch: fitted {fitted}, got {got}")]
    FeatureWidth {
        /// Width the models were fitted with.
        fitted: usize,
        /// Width of the offending vector.
        got: usize,
    },
}

// ============================================================================
// SECTION: Fitted Models
// ============================================================================

/// Per-feature standardization parameters.
#[derive(Debug, Clone, PartialEq)]
struct Scaler {
    /// Per-feature means.
    means: Vec<f64>,
    /// Per-feature standard deviations (floored to avoid division by zero).
    stddevs: Vec<f64>,
}

impl Scaler {
    /// Fits a scaler over sample features.
    fn fit(samples: &[&TrainingSample]) -> Self {
        let width = samples.first().map_or(0, |sample| sample.features.len());
        let count = samples.len().max(1);
        let mut means = vec![0.0; width];
        for sample in samples {
            for (slot, value) in means.iter_mut().zip(sample.features.iter()) {
                *slot += value;
            }
        }
        #[allow(clippy::cast_precision_loss, reason = "history is capped far below 2^52")]
        let denom = count as f64;
        for slot in &mut means {
            *slot /= denom;
        }
        let mut stddevs = vec![0.0; width];
        for sample in samples {
            for ((slot, mean), value) in
                stddevs.iter_mut().zip(means.iter()).zip(sample.features.iter())
            {
                let diff = value - mean;
                *slot += diff * diff;
            }
        }
        for slot in &mut stddevs {
            *slot = (*slot / denom).sqrt().max(1e-9);
        }
        Self {
            means,
            stddevs,
        }
    }

    /// Standardizes one feature vector.
    fn apply(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.means.iter().zip(self.stddevs.iter()))
            .map(|(value, (mean, stddev))| (value - mean) / stddev)
            .collect()
    }
}

/// Depth-1 regression stump.
#[derive(Debug, Clone, PartialEq)]
struct Stump {
    /// Split feature index.
    feature: usize,
    /// Split threshold in scaled space.
    threshold: f64,
    /// Contribution for values at or below the threshold.
    left: f64,
    /// Contribution for values above the threshold.
    right: f64,
}

/// One fitted per-target model.
#[derive(Debug, Clone, PartialEq)]
enum FittedModel {
    /// Constant prediction.
    Mean {
        /// Predicted constant.
        mean: f64,
    },
    /// Ridge regression over scaled features.
    Ridge {
        /// Feature scaler.
        scaler: Scaler,
        /// Regression weights.
        weights: Vec<f64>,
        /// Intercept term.
        intercept: f64,
    },
    /// Gradient-boosted stumps over scaled features.
    Boost {
        /// Feature scaler.
        scaler: Scaler,
        /// Base prediction.
        base: f64,
        /// Boosted stump ensemble.
        stumps: Vec<Stump>,
        /// Shrinkage applied per stump.
        learning_rate: f64,
    },
}

impl FittedModel {
    /// Predicts one feature vector.
    fn predict(&self, features: &[f64]) -> f64 {
        match self {
            Self::Mean {
                mean,
            } => *mean,
            Self::Ridge {
                scaler,
                weights,
                intercept,
            } => {
                let scaled = scaler.apply(features);
                let dot: f64 =
                    scaled.iter().zip(weights.iter()).map(|(value, weight)| value * weight).sum();
                dot + intercept
            }
            Self::Boost {
                scaler,
                base,
                stumps,
                learning_rate,
            } => {
                let scaled = scaler.apply(features);
                let mut prediction = *base;
                for stump in stumps {
                    let value = scaled.get(stump.feature).copied().unwrap_or(0.0);
                    let contribution =
                        if value <= stump.threshold { stump.left } else { stump.right };
                    prediction += learning_rate * contribution;
                }
                prediction
            }
        }
    }
}

// ============================================================================
// SECTION: Surrogate Bank
// ============================================================================

/// Per-target surrogate models over a capped FIFO history.
#[derive(Debug)]
pub struct SurrogateBank {
    /// Configuration.
    config: SurrogateConfig,
    /// Retained training samples, oldest first.
    history: VecDeque<TrainingSample>,
    /// Fitted per-target models, in [`Target::ALL`] order.
    models: Vec<FittedModel>,
    /// Feature width the models were fitted with.
    fitted_width: usize,
}

impl SurrogateBank {
    /// Creates an empty bank.
    #[must_use]
    pub fn new(config: SurrogateConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            models: Vec::new(),
            fitted_width: 0,
        }
    }

    /// Returns the retained sample count.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Appends an observation, evicting the oldest beyond the cap.
    pub fn push_observation(&mut self, sample: TrainingSample) {
        if self.history.len() >= self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    /// Re-fits every target model and reports fit quality.
    pub fn fit(&mut self, baselines: Baselines) -> SurrogateReport {
        let samples: Vec<&TrainingSample> = self.history.iter().collect();
        self.fitted_width = samples.first().map_or(0, |sample| sample.features.len());
        self.models.clear();

        let mut reports = Vec::with_capacity(Target::ALL.len());
        for target in Target::ALL {
            let baseline = baseline_for(baselines, target);
            let model = fit_target(&self.config, &samples, target, baseline);
            reports.push(report_for(&model, &samples, target));
            self.models.push(model);
        }

        SurrogateReport {
            kind: self.active_kind().as_str().to_string(),
            delta_linf: reports[0],
            mdl_gain: reports[1],
            ppl_ood: reports[2],
        }
    }

    /// Returns the effective variant after fallback rules.
    #[must_use]
    pub fn active_kind(&self) -> SurrogateKind {
        if self.history.len() < self.config.min_fit_samples {
            SurrogateKind::Mean
        } else {
            self.config.kind
        }
    }

    /// Predicts one candidate with 95% confidence intervals.
    ///
    /// Intervals bootstrap (at most the configured resamples) when the
    /// history is deep enough, otherwise fall back to a relative band.
    /// Post-hoc clamps keep each target in its legal range.
    ///
    /// # Errors
    ///
    /// Returns [`SurrogateError::FeatureWidth`] when the vector width
    /// diverges from the fitted width.
    pub fn predict_with_ci(
        &self,
        features: &[f64],
        rng: &mut DetRng,
    ) -> Result<PredictionSet, SurrogateError> {
        if self.fitted_width != 0 && features.len() != self.fitted_width {
            return Err(SurrogateError::FeatureWidth {
                fitted: self.fitted_width,
                got: features.len(),
            });
        }

        let mut predictions = Vec::with_capacity(Target::ALL.len());
        for (slot, target) in Target::ALL.iter().enumerate() {
            let point = self.models.get(slot).map_or(0.0, |model| model.predict(features));
            let interval = self.interval_for(*target, slot, features, point, rng);
            predictions.push(Prediction {
                point,
                ci_lo: interval.0,
                ci_hi: interval.1,
            });
        }

        Ok(clamp_set(PredictionSet {
            delta_linf: predictions[0],
            mdl_gain: predictions[1],
            ppl_ood: predictions[2],
        }))
    }

    /// Computes the 95% interval for one target prediction.
    fn interval_for(
        &self,
        target: Target,
        slot: usize,
        features: &[f64],
        point: f64,
        rng: &mut DetRng,
    ) -> (f64, f64) {
        let samples: Vec<&TrainingSample> = self.history.iter().collect();
        if samples.len() < self.config.bootstrap_min_samples
            || matches!(self.models.get(slot), Some(FittedModel::Mean { .. }) | None)
        {
            let half = point.abs() * self.config.fallback_ci_frac;
            return (point - half, point + half);
        }

        let baseline = point;
        let mut resampled_points = Vec::with_capacity(self.config.bootstrap_resamples);
        let bootstrap_config = SurrogateConfig {
            boost_rounds: self.config.boost_rounds_bootstrap,
            ..self.config.clone()
        };
        for _ in 0..self.config.bootstrap_resamples {
            let resample: Vec<&TrainingSample> =
                (0..samples.len()).map(|_| samples[rng.index(samples.len())]).collect();
            let model = fit_target(&bootstrap_config, &resample, target, baseline);
            resampled_points.push(model.predict(features));
        }

        #[allow(clippy::cast_precision_loss, reason = "resample count is at most 50")]
        let count = resampled_points.len().max(1) as f64;
        let mean: f64 = resampled_points.iter().sum::<f64>() / count;
        let variance: f64 = resampled_points
            .iter()
            .map(|value| {
                let diff = value - mean;
                diff * diff
            })
            .sum::<f64>()
            / count;
        let half = 1.96 * variance.sqrt();
        (point - half, point + half)
    }
}

/// Selects the baseline for a target.
const fn baseline_for(baselines: Baselines, target: Target) -> f64 {
    match target {
        Target::DeltaLinf => baselines.delta_linf,
        Target::MdlGain => baselines.mdl_gain,
        Target::PplOod => baselines.ppl_ood,
    }
}

// ============================================================================
// SECTION: Fitting
// ============================================================================

/// Fits one target model under the fallback rules.
fn fit_target(
    config: &SurrogateConfig,
    samples: &[&TrainingSample],
    target: Target,
    baseline: f64,
) -> FittedModel {
    if samples.len() < config.min_fit_samples {
        return FittedModel::Mean {
            mean: historical_mean(samples, target, baseline),
        };
    }
    match config.kind {
        SurrogateKind::Mean => FittedModel::Mean {
            mean: historical_mean(samples, target, baseline),
        },
        SurrogateKind::Ridge => fit_ridge(config, samples, target, baseline),
        SurrogateKind::Boost => fit_boost(config, samples, target, baseline),
    }
}

/// Returns the historical mean or the baseline when empty.
fn historical_mean(samples: &[&TrainingSample], target: Target, baseline: f64) -> f64 {
    if samples.is_empty() {
        return baseline;
    }
    #[allow(clippy::cast_precision_loss, reason = "history is capped far below 2^52")]
    let count = samples.len() as f64;
    samples.iter().map(|sample| sample.value_for(target)).sum::<f64>() / count
}

/// Fits a ridge regression via the damped normal equations.
fn fit_ridge(
    config: &SurrogateConfig,
    samples: &[&TrainingSample],
    target: Target,
    baseline: f64,
) -> FittedModel {
    let scaler = Scaler::fit(samples);
    let width = scaler.means.len();
    let scaled: Vec<Vec<f64>> =
        samples.iter().map(|sample| scaler.apply(&sample.features)).collect();
    let mean_y = historical_mean(samples, target, baseline);

    // Normal equations on centered targets: (X'X + λI) w = X'y.
    let mut gram = vec![vec![0.0_f64; width]; width];
    let mut moment = vec![0.0_f64; width];
    for (row, sample) in scaled.iter().zip(samples.iter()) {
        let centered = sample.value_for(target) - mean_y;
        for i in 0..width {
            moment[i] += row[i] * centered;
            for j in 0..width {
                gram[i][j] += row[i] * row[j];
            }
        }
    }
    for (i, row) in gram.iter_mut().enumerate() {
        row[i] += config.ridge_lambda;
    }

    solve_linear(gram, moment).map_or(
        FittedModel::Mean {
            mean: mean_y,
        },
        |weights| FittedModel::Ridge {
            scaler,
            weights,
            intercept: mean_y,
        },
    )
}

/// Fits gradient-boosted depth-1 stumps on squared error.
fn fit_boost(
    config: &SurrogateConfig,
    samples: &[&TrainingSample],
    target: Target,
    baseline: f64,
) -> FittedModel {
    let scaler = Scaler::fit(samples);
    let width = scaler.means.len();
    let scaled: Vec<Vec<f64>> =
        samples.iter().map(|sample| scaler.apply(&sample.features)).collect();
    let base = historical_mean(samples, target, baseline);

    let mut residuals: Vec<f64> =
        samples.iter().map(|sample| sample.value_for(target) - base).collect();
    let mut stumps = Vec::with_capacity(config.boost_rounds);

    for _ in 0..config.boost_rounds {
        let Some(stump) = best_stump(&scaled, &residuals, width) else {
            break;
        };
        for (residual, row) in residuals.iter_mut().zip(scaled.iter()) {
            let value = row.get(stump.feature).copied().unwrap_or(0.0);
            let contribution = if value <= stump.threshold { stump.left } else { stump.right };
            *residual -= config.boost_learning_rate * contribution;
        }
        stumps.push(stump);
    }

    FittedModel::Boost {
        scaler,
        base,
        stumps,
        learning_rate: config.boost_learning_rate,
    }
}

/// Finds the squared-error-optimal stump over candidate median splits.
fn best_stump(scaled: &[Vec<f64>], residuals: &[f64], width: usize) -> Option<Stump> {
    let mut best: Option<(f64, Stump)> = None;
    for feature in 0..width {
        let mut values: Vec<f64> =
            scaled.iter().map(|row| row.get(feature).copied().unwrap_or(0.0)).collect();
        values.sort_by(f64::total_cmp);
        let threshold = values[values.len() / 2];

        let mut left_sum = 0.0;
        let mut left_count = 0.0_f64;
        let mut right_sum = 0.0;
        let mut right_count = 0.0_f64;
        for (row, residual) in scaled.iter().zip(residuals.iter()) {
            let value = row.get(feature).copied().unwrap_or(0.0);
            if value <= threshold {
                left_sum += residual;
                left_count += 1.0;
            } else {
                right_sum += residual;
                right_count += 1.0;
            }
        }
        if left_count == 0.0 || right_count == 0.0 {
            continue;
        }
        let left = left_sum / left_count;
        let right = right_sum / right_count;
        let gain = left * left_sum + right * right_sum;
        let stump = Stump {
            feature,
            threshold,
            left,
            right,
        };
        if best.as_ref().is_none_or(|(best_gain, _)| gain > *best_gain) {
            best = Some((gain, stump));
        }
    }
    best.map(|(_, stump)| stump)
}

/// Solves a square linear system with partial pivoting.
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for pivot in 0..n {
        let mut max_row = pivot;
        for row in pivot + 1..n {
            if a[row][pivot].abs() > a[max_row][pivot].abs() {
                max_row = row;
            }
        }
        if a[max_row][pivot].abs() < 1e-12 {
            return None;
        }
        a.swap(pivot, max_row);
        b.swap(pivot, max_row);
        for row in pivot + 1..n {
            let factor = a[row][pivot] / a[pivot][pivot];
            for column in pivot..n {
                a[row][column] -= factor * a[pivot][column];
            }
            b[row] -= factor * b[pivot];
        }
    }
    let mut solution = vec![0.0; n];
    for pivot in (0..n).rev() {
        let mut accumulated = b[pivot];
        for column in pivot + 1..n {
            accumulated -= a[pivot][column] * solution[column];
        }
        solution[pivot] = accumulated / a[pivot][pivot];
    }
    Some(solution)
}

// ============================================================================
// SECTION: Reporting and Clamps
// ============================================================================

/// Computes training-set fit quality for one model.
fn report_for(model: &FittedModel, samples: &[&TrainingSample], target: Target) -> TargetReport {
    if samples.is_empty() {
        return TargetReport {
            n_samples: 0,
            r2: 0.0,
            mae: 0.0,
        };
    }
    #[allow(clippy::cast_precision_loss, reason = "history is capped far below 2^52")]
    let count = samples.len() as f64;
    let mean_y =
        samples.iter().map(|sample| sample.value_for(target)).sum::<f64>() / count;
    let mut absolute_error = 0.0;
    let mut squared_error = 0.0;
    let mut total_variance = 0.0;
    for sample in samples {
        let observed = sample.value_for(target);
        let predicted = model.predict(&sample.features);
        absolute_error += (observed - predicted).abs();
        squared_error += (observed - predicted) * (observed - predicted);
        total_variance += (observed - mean_y) * (observed - mean_y);
    }
    let r2 = if total_variance > 0.0 { 1.0 - squared_error / total_variance } else { 0.0 };
    TargetReport {
        n_samples: samples.len(),
        r2,
        mae: absolute_error / count,
    }
}

/// Applies the post-hoc legality clamps to a prediction set.
fn clamp_set(set: PredictionSet) -> PredictionSet {
    /// Clamps one prediction to a floor.
    fn floor_prediction(prediction: Prediction, floor: f64) -> Prediction {
        Prediction {
            point: prediction.point.max(floor),
            ci_lo: prediction.ci_lo.max(floor),
            ci_hi: prediction.ci_hi.max(floor),
        }
    }
    PredictionSet {
        delta_linf: floor_prediction(set.delta_linf, 0.0),
        mdl_gain: floor_prediction(set.mdl_gain, 0.0),
        ppl_ood: floor_prediction(set.ppl_ood, 1.0),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]

    use super::*;

    /// Builds a linear-target sample at the given coordinate.
    fn linear_sample(x: f64) -> TrainingSample {
        TrainingSample {
            features: vec![x, 1.0 - x],
            delta_linf: 0.02 * x + 0.01,
            mdl_gain: 0.05 * x,
            ppl_ood: 100.0 - 10.0 * x,
        }
    }

    /// Default baselines for tests.
    const BASELINES: Baselines = Baselines {
        delta_linf: 0.05,
        mdl_gain: 0.05,
        ppl_ood: 100.0,
    };

    #[test]
    fn empty_history_degenerates_to_baselines() {
        let mut bank = SurrogateBank::new(SurrogateConfig::default());
        let report = bank.fit(BASELINES);
        assert_eq!(report.kind, "mean");
        assert_eq!(report.delta_linf.n_samples, 0);

        let mut rng = DetRng::from_seed(7);
        let set = bank.predict_with_ci(&[0.5, 0.5], &mut rng).expect("predict");
        assert!(set.ppl_ood.point >= 1.0);
    }

    #[test]
    fn thin_history_uses_mean_fallback() {
        let mut bank = SurrogateBank::new(SurrogateConfig::default());
        for index in 0..3 {
            bank.push_observation(linear_sample(f64::from(index) / 3.0));
        }
        assert_eq!(bank.active_kind(), SurrogateKind::Mean);
    }

    #[test]
    fn ridge_learns_a_linear_target() {
        let mut bank = SurrogateBank::new(SurrogateConfig::default());
        for index in 0..40 {
            bank.push_observation(linear_sample(f64::from(index) / 40.0));
        }
        let report = bank.fit(BASELINES);
        assert_eq!(report.kind, "ridge");
        assert!(report.delta_linf.r2 > 0.8, "r2 was {}", report.delta_linf.r2);

        let mut rng = DetRng::from_seed(11);
        let set = bank.predict_with_ci(&[0.9, 0.1], &mut rng).expect("predict");
        assert!(set.ci_contains_point());
    }

    #[test]
    fn history_is_fifo_capped() {
        let config = SurrogateConfig {
            history_size: 8,
            ..SurrogateConfig::default()
        };
        let mut bank = SurrogateBank::new(config);
        for index in 0..20 {
            bank.push_observation(linear_sample(f64::from(index) / 20.0));
        }
        assert_eq!(bank.history_len(), 8);
    }

    #[test]
    fn boost_variant_fits_without_failure() {
        let config = SurrogateConfig {
            kind: SurrogateKind::Boost,
            ..SurrogateConfig::default()
        };
        let mut bank = SurrogateBank::new(config);
        for index in 0..30 {
            bank.push_observation(linear_sample(f64::from(index) / 30.0));
        }
        let report = bank.fit(BASELINES);
        assert_eq!(report.kind, "boost");
        assert!(report.delta_linf.mae >= 0.0);
    }

    #[test]
    fn feature_width_mismatch_is_rejected() {
        let mut bank = SurrogateBank::new(SurrogateConfig::default());
        for index in 0..10 {
            bank.push_observation(linear_sample(f64::from(index) / 10.0));
        }
        bank.fit(BASELINES);
        let mut rng = DetRng::from_seed(3);
        assert!(bank.predict_with_ci(&[0.5], &mut rng).is_err());
    }

    impl PredictionSet {
        /// Returns true when every point sits inside its own interval.
        fn ci_contains_point(&self) -> bool {
            let inside = |prediction: Prediction| {
                prediction.ci_lo <= prediction.point && prediction.point <= prediction.ci_hi
            };
            inside(self.delta_linf) && inside(self.mdl_gain) && inside(self.ppl_ood)
        }
    }
}
