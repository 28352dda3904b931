// crucible-engine/src/engine.rs
// ============================================================================
// Module: Crucible Mutation Engine
// Description: The mutation-and-ranking pipeline from state to bundle.
// Purpose: Produce a bounded set of safe, scored candidate mutations under
//          trust-region and budget constraints.
// Dependencies: crate::{bench, bundle, diversity, distance, ednag, fabric,
//               features, genespace, genotype, rng, sandbox, score,
//               surrogate}, crucible-core
// ============================================================================

//! ## Overview
//! The engine is the single canonical mutation path: gate entry, base
//! genotype construction, seeded operator generation under the trust region,
//! sandbox clearance, surrogate prediction, safe-utility scoring, diverse
//! selection, state projection, and bundle packaging. Every step records
//! ledger events tagged with the cycle identifier derived from the plan
//! hash, and every stochastic decision flows from
//! `H(state || plan || acq || seed)`, so identical inputs replay to
//! identical bundles.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use crucible_core::AcquisitionReport;
use crucible_core::CandidateId;
use crucible_core::EventKind;
use crucible_core::HashError;
use crucible_core::Ledger;
use crucible_core::LedgerError;
use crucible_core::Plan;
use crucible_core::PlanError;
use crucible_core::StateError;
use crucible_core::SystemState;
use crucible_core::hashing::hash_canonical_json;
use crucible_core::hashing::hash_segments;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::bench::BenchProfile;
use crate::bench::BenchResult;
use crate::bundle::BundleError;
use crate::bundle::Candidate;
use crate::bundle::EnvCaps;
use crate::bundle::MutationBundle;
use crate::bundle::Patch;
use crate::bundle::pack;
use crate::distance::hybrid_distance;
use crate::diversity::DiversityConfig;
use crate::diversity::select_top_k;
use crate::ednag::EliteSlot;
use crate::ednag::OperatorContext;
use crate::ednag::OperatorKind;
use crate::ednag::flag;
use crate::ednag::point;
use crate::ednag::recombination;
use crate::ednag::segment;
use crate::ednag::sr_noise_multiplier;
use crate::fabric::base_genotype;
use crate::features::extract;
use crate::genespace::GeneSpace;
use crate::genespace::GeneSpaceError;
use crate::genespace::ParamValue;
use crate::genotype::Genotype;
use crate::rng::DetRng;
use crate::sandbox::SandboxLimits;
use crate::sandbox::analyze;
use crate::sandbox::execute;
use crate::sandbox::smoke_snippet;
use crate::score::ScoreInputs;
use crate::score::ScoreParams;
use crate::score::safe_utility;
use crate::surrogate::Baselines;
use crate::surrogate::PredictionSet;
use crate::surrogate::SurrogateBank;
use crate::surrogate::SurrogateConfig;
use crate::surrogate::SurrogateError;
use crate::surrogate::TrainingSample;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Mutation engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Generation iterations per cycle.
    pub n_candidates: usize,
    /// Selected bundle size.
    pub top_k: usize,
    /// Whether the elite is re-emitted after the loop.
    pub elitism: bool,
    /// Entry-gate calibration ceiling.
    pub ece_max: f64,
    /// Entry-gate contractivity ceiling.
    pub rho_max: f64,
    /// Trust-region tolerance epsilon.
    pub tr_epsilon: f64,
    /// Directory receiving packed bundle archives.
    pub artifact_dir: PathBuf,
    /// Micro-benchmark coefficients.
    pub bench: BenchProfile,
    /// Scoring coefficients.
    pub score: ScoreParams,
    /// Diversity selection configuration.
    pub diversity: DiversityConfig,
    /// Sandbox execution ceilings.
    pub sandbox: SandboxLimits,
    /// Surrogate configuration.
    pub surrogate: SurrogateConfig,
}

impl EngineConfig {
    /// Creates a configuration writing archives under the provided directory.
    #[must_use]
    pub fn with_artifact_dir(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            n_candidates: 32,
            top_k: 5,
            elitism: true,
            ece_max: 0.01,
            rho_max: 0.95,
            tr_epsilon: 1e-6,
            artifact_dir: artifact_dir.into(),
            bench: BenchProfile::default(),
            score: ScoreParams::default(),
            diversity: DiversityConfig::default(),
            sandbox: SandboxLimits::default(),
            surrogate: SurrogateConfig::default(),
        }
    }
}

/// Per-invocation overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvolveRequest {
    /// Generation iterations override.
    pub n_candidates: Option<usize>,
    /// Bundle size override.
    pub top_k: Option<usize>,
    /// Cycle seed.
    pub seed: u64,
}

/// Engine output for one cycle.
#[derive(Debug)]
pub struct EvolveOutcome {
    /// Packed mutation bundle.
    pub bundle: MutationBundle,
    /// Updated state projection.
    pub state: SystemState,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Mutation engine failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// State failed bound validation.
    #[error("invalid state: {0}")]
    State(#[from] StateError),
    /// Plan failed validation.
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),
    /// Gene space declaration is inconsistent.
    #[error("invalid gene space: {0}")]
    GeneSpace(#[from] GeneSpaceError),
    /// Canonical hashing failed.
    #[error("hash failure: {0}")]
    Hash(#[from] HashError),
    /// Ledger append failed.
    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),
    /// Bundle packaging failed.
    #[error("bundle failure: {0}")]
    Bundle(#[from] BundleError),
    /// Surrogate prediction failed.
    #[error("surrogate failure: {0}")]
    Surrogate(#[from] SurrogateError),
    /// State violated an entry gate; the cycle was aborted.
    #[error("entry gate violation: {reason}")]
    EntryGate {
        /// Violated gate description.
        reason: String,
    },
    /// No candidate survived every gate.
    #[error("no_valid_candidates")]
    NoValidCandidates,
}

// ============================================================================
// SECTION: Working State
// ============================================================================

/// Candidate under construction, with material the manifest omits.
struct WorkingCandidate {
    /// Public candidate record.
    candidate: Candidate,
    /// Feature vector for the surrogate.
    features: Vec<f64>,
}

/// Remaining engine-side generation budget.
struct GenerationBudget {
    /// Remaining abstract cost.
    cost: f64,
    /// Remaining latency milliseconds.
    latency_ms: f64,
}

impl GenerationBudget {
    /// Returns true when a bench result fits the remaining budget.
    fn affords(&self, bench: BenchResult) -> bool {
        bench.cost <= self.cost && bench.latency_ms <= self.latency_ms
    }

    /// Returns true when nothing meaningful remains.
    fn exhausted(&self) -> bool {
        self.cost <= 0.0 || self.latency_ms <= 0.0
    }

    /// Debits an accepted candidate.
    fn debit(&mut self, bench: BenchResult) {
        self.cost -= bench.cost;
        self.latency_ms -= bench.latency_ms;
    }
}

// ============================================================================
// SECTION: Mutation Engine
// ============================================================================

/// The mutation-and-ranking engine.
pub struct MutationEngine {
    /// Engine configuration.
    config: EngineConfig,
    /// Gene space declaration.
    space: GeneSpace,
    /// Surrogate predictor bank.
    surrogates: SurrogateBank,
}

impl MutationEngine {
    /// Creates an engine over a validated gene space.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::GeneSpace`] when the declaration is
    /// inconsistent.
    pub fn new(config: EngineConfig, space: GeneSpace) -> Result<Self, EngineError> {
        space.validate()?;
        let surrogate_config = config.surrogate.clone();
        Ok(Self {
            config,
            space,
            surrogates: SurrogateBank::new(surrogate_config),
        })
    }

    /// Feeds one observed outcome into the surrogate history.
    pub fn observe(&mut self, sample: TrainingSample) {
        self.surrogates.push_observation(sample);
    }

    /// Returns the retained surrogate history depth.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.surrogates.history_len()
    }

    /// Runs one mutation cycle.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on entry-gate violation, empty survivor set,
    /// or any infrastructure failure. Entry-gate violations and empty
    /// survivor sets are recorded as abort events before returning.
    pub fn evolve(
        &mut self,
        ledger: &Ledger,
        state: &SystemState,
        plan: &Plan,
        acq: &AcquisitionReport,
        request: &EvolveRequest,
    ) -> Result<EvolveOutcome, EngineError> {
        state.validate()?;
        plan.validate()?;

        let plan_hash = plan.canonical_hash()?;
        let cycle = cycle_id(&plan_hash);

        self.check_entry_gates(ledger, state, &cycle)?;

        let state_hash = state.canonical_hash()?;
        let acq_hash = hash_canonical_json(acq)?;
        let cycle_digest = hash_segments(&[
            state_hash.as_bytes(),
            plan_hash.as_bytes(),
            acq_hash.as_bytes(),
            &request.seed.to_le_bytes(),
        ]);

        let start_proof = ledger.record(
            EventKind::MutStart,
            json!({
                "cycle": cycle,
                "plan_hash": plan_hash,
                "seed": request.seed,
                "sr_score": state.sr_score,
                "rho": state.rho,
            }),
        )?;

        let base = base_genotype(&self.space, acq, &cycle_digest)?;
        ledger.record(
            EventKind::MutGenotype,
            json!({
                "cycle": cycle,
                "hash_base": base.hash_base,
                "schema": self.space.version,
            }),
        )?;

        let mut rng =
            DetRng::from_digest(&hash_segments(&[cycle_digest.as_bytes(), b"ednag"]));
        let n_candidates = request.n_candidates.unwrap_or(self.config.n_candidates);
        let top_k = request.top_k.unwrap_or(self.config.top_k);

        let mut working = self.generate(
            ledger,
            state,
            plan,
            acq,
            &base,
            &cycle,
            &cycle_digest,
            n_candidates,
            &mut rng,
        )?;

        if working.is_empty() {
            ledger.record(
                EventKind::MutAbort,
                json!({"cycle": cycle, "reason": "no_valid_candidates"}),
            )?;
            return Err(EngineError::NoValidCandidates);
        }

        // Surrogate fit over the accumulated history, then final predictions.
        let report = self.surrogates.fit(Baselines {
            delta_linf: self.config.bench.prediction_baseline,
            mdl_gain: self.config.bench.prediction_baseline,
            ppl_ood: self.config.bench.ppl_baseline,
        });
        for entry in &mut working {
            let predictions = self.surrogates.predict_with_ci(&entry.features, &mut rng)?;
            entry.candidate.pred_metrics = predictions;
            entry.candidate.score = self.final_score(state, &entry.candidate);
            entry.candidate.explain = explain_line(&entry.candidate);
        }

        working.sort_by(|a, b| {
            b.candidate
                .score
                .total_cmp(&a.candidate.score)
                .then_with(|| a.candidate.cand_id.cmp(&b.candidate.cand_id))
        });
        working.retain(|entry| entry.candidate.score > 0.0);
        if working.is_empty() {
            ledger.record(
                EventKind::MutAbort,
                json!({"cycle": cycle, "reason": "no_valid_candidates"}),
            )?;
            return Err(EngineError::NoValidCandidates);
        }

        ledger.record(
            EventKind::MutScore,
            json!({
                "cycle": cycle,
                "scored": working.len(),
                "top_score": working[0].candidate.score,
                "surrogate": report.kind,
            }),
        )?;

        let pool: Vec<Candidate> =
            working.iter().map(|entry| entry.candidate.clone()).collect();
        let (indices, summary) = select_top_k(&self.config.diversity, &pool, top_k);
        let selected: Vec<Candidate> =
            indices.iter().map(|index| pool[*index].clone()).collect();

        let mut updated = state.clone();
        apply_state_update(&mut updated, &plan_hash, &start_proof, &selected)?;

        let xt_updates = json!({
            "delta_linf_pred": updated.delta_linf_pred,
            "mdl_gain_pred": updated.mdl_gain_pred,
            "ppl_ood_pred": updated.ppl_ood_pred,
            "cycle_count": updated.cycle_count,
        });

        let cand_ids: Vec<&str> =
            selected.iter().map(|candidate| candidate.cand_id.as_str()).collect();
        let id_material: Vec<&[u8]> = std::iter::once(cycle_digest.as_bytes())
            .chain(cand_ids.iter().map(|id| id.as_bytes()))
            .collect();
        let bundle_id = format!("bundle_{}", short_hex(&hash_segments(&id_material)));

        let mut bundle = MutationBundle {
            bundle_id,
            plan_hash: plan_hash.clone(),
            seed: request.seed,
            top_k: selected,
            surrogate_report: report,
            diversity_summary: summary,
            xt_updates,
            artifact_path: PathBuf::new(),
        };
        let archive = pack(&mut bundle, &self.config.artifact_dir)?;
        ledger.record(
            EventKind::MutBundle,
            json!({
                "cycle": cycle,
                "bundle_id": bundle.bundle_id,
                "artifact": archive.display().to_string(),
                "selected": bundle.top_k.len(),
            }),
        )?;
        ledger.record(
            EventKind::MutDone,
            json!({"cycle": cycle, "bundle_id": bundle.bundle_id}),
        )?;

        Ok(EvolveOutcome {
            bundle,
            state: updated,
        })
    }

    /// Rejects the cycle when the state violates the ethical entry gates.
    fn check_entry_gates(
        &self,
        ledger: &Ledger,
        state: &SystemState,
        cycle: &str,
    ) -> Result<(), EngineError> {
        let mut violations: Vec<String> = Vec::new();
        if state.ece > self.config.ece_max {
            violations.push(format!("ECE={:.4} > {}", state.ece, self.config.ece_max));
        }
        if state.rho > self.config.rho_max {
            violations.push(format!("rho={:.4} > {}", state.rho, self.config.rho_max));
        }
        if violations.is_empty() {
            return Ok(());
        }
        let reason = violations.join("; ");
        ledger.record(
            EventKind::MutAbort,
            json!({"cycle": cycle, "reason": reason, "gate": "entry"}),
        )?;
        Err(EngineError::EntryGate {
            reason,
        })
    }

    /// Runs the generation loop and returns every surviving candidate.
    #[allow(clippy::too_many_arguments, reason = "pipeline stage shares cycle context")]
    fn generate(
        &self,
        ledger: &Ledger,
        state: &SystemState,
        plan: &Plan,
        acq: &AcquisitionReport,
        base: &Genotype,
        cycle: &str,
        cycle_digest: &str,
        n_candidates: usize,
        rng: &mut DetRng,
    ) -> Result<Vec<WorkingCandidate>, EngineError> {
        let ctx = OperatorContext {
            radius: state.trust_region_radius,
            sr_multiplier: sr_noise_multiplier(state.sr_score),
        };
        let mut budget = GenerationBudget {
            cost: plan.budgets.max_cost,
            #[allow(clippy::cast_precision_loss, reason = "budgets sit far below 2^52")]
            latency_ms: plan.budgets.max_latency_ms as f64,
        };
        let mut elite = EliteSlot::default();
        let mut working: Vec<WorkingCandidate> = Vec::new();

        for iteration in 0..n_candidates {
            if budget.exhausted() {
                ledger.record(
                    EventKind::MutSkipBudget,
                    json!({"cycle": cycle, "iteration": iteration, "reason": "exhausted"}),
                )?;
                break;
            }

            let op = OperatorKind::sample(rng);
            let (genotype, op_seq) = self.apply_operator(op, base, &elite, ctx, rng);

            let distance = hybrid_distance(&self.space, base, &genotype);
            if distance > state.trust_region_radius * (1.0 + self.config.tr_epsilon) {
                ledger.record(
                    EventKind::MutSkipTr,
                    json!({
                        "cycle": cycle,
                        "iteration": iteration,
                        "distance": distance,
                        "radius": state.trust_region_radius,
                    }),
                )?;
                continue;
            }

            if let Some(entry) = self.admit_candidate(
                ledger,
                state,
                acq,
                &genotype,
                op_seq,
                distance,
                cycle,
                cycle_digest,
                iteration,
                &mut budget,
                rng,
            )? {
                elite.offer(&genotype, entry.candidate.score);
                working.push(entry);
            }
        }

        // Elitism re-emits the best genotype with a synthetic op. The
        // reported distance stays 0.0 to match the historical reporting
        // behavior even though the elite genotype differs from the base.
        if self.config.elitism
            && let Some(genotype) = elite.genotype.clone()
            && !budget.exhausted()
            && let Some(entry) = self.admit_candidate(
                ledger,
                state,
                acq,
                &genotype,
                vec![OperatorKind::Elite.as_str().to_string()],
                0.0,
                cycle,
                cycle_digest,
                n_candidates,
                &mut budget,
                rng,
            )?
        {
            working.push(entry);
        }

        Ok(working)
    }

    /// Applies one sampled operator to the base genotype.
    fn apply_operator(
        &self,
        op: OperatorKind,
        base: &Genotype,
        elite: &EliteSlot,
        ctx: OperatorContext,
        rng: &mut DetRng,
    ) -> (Genotype, Vec<String>) {
        match op {
            OperatorKind::Point => {
                (point(&self.space, base, ctx, rng), vec![op.as_str().to_string()])
            }
            OperatorKind::Segment => {
                (segment(&self.space, base, ctx, rng), vec![op.as_str().to_string()])
            }
            OperatorKind::Recombination => {
                let partner = elite.genotype.as_ref().unwrap_or(base);
                let child = recombination(&self.space, base, partner, ctx, rng);
                (
                    child,
                    vec![
                        OperatorKind::Point.as_str().to_string(),
                        op.as_str().to_string(),
                    ],
                )
            }
            OperatorKind::Flag => {
                (flag(&self.space, base, ctx, rng), vec![op.as_str().to_string()])
            }
            OperatorKind::Elite => (base.clone(), vec![op.as_str().to_string()]),
        }
    }

    /// Sanitizes, simulates, budgets, and provisionally scores one genotype.
    ///
    /// Returns `None` when a gate rejected the candidate (the rejection is
    /// already recorded).
    #[allow(clippy::too_many_arguments, reason = "pipeline stage shares cycle context")]
    fn admit_candidate(
        &self,
        ledger: &Ledger,
        state: &SystemState,
        acq: &AcquisitionReport,
        genotype: &Genotype,
        op_seq: Vec<String>,
        distance: f64,
        cycle: &str,
        cycle_digest: &str,
        iteration: usize,
        budget: &mut GenerationBudget,
        rng: &mut DetRng,
    ) -> Result<Option<WorkingCandidate>, EngineError> {
        let params = genotype.denormalize(&self.space);
        let env_caps = derive_env_caps(&params, self.config.sandbox);

        let snippet = smoke_snippet(&params, acq);
        let issues = analyze(&snippet);
        if !issues.is_empty() {
            let tags: Vec<&str> = issues.iter().map(|tag| tag.as_str()).collect();
            ledger.record(
                EventKind::MutSanitize,
                json!({"cycle": cycle, "iteration": iteration, "issues": tags}),
            )?;
            return Ok(None);
        }

        let bench = match execute(
            self.config.sandbox,
            env_caps.max_memory_mb,
            &self.config.bench,
            &params,
            acq,
        ) {
            Ok(result) => result,
            Err(failure) => {
                ledger.record(
                    EventKind::MutSanitize,
                    json!({
                        "cycle": cycle,
                        "iteration": iteration,
                        "issues": [failure.issue_tag().as_str()],
                    }),
                )?;
                return Ok(None);
            }
        };
        ledger.record(
            EventKind::MutSimulate,
            json!({
                "cycle": cycle,
                "iteration": iteration,
                "latency_ms": bench.latency_ms,
                "cost": bench.cost,
                "risk": bench.risk,
            }),
        )?;

        if !budget.affords(bench) {
            ledger.record(
                EventKind::MutSkipBudget,
                json!({
                    "cycle": cycle,
                    "iteration": iteration,
                    "cost": bench.cost,
                    "remaining": budget.cost,
                }),
            )?;
            return Ok(None);
        }

        let identity = genotype.identity_hash()?;
        let cand_id = CandidateId::new(format!(
            "cand_{}",
            short_hex(&hash_segments(&[
                cycle_digest.as_bytes(),
                &iteration.to_le_bytes(),
                identity.as_bytes(),
            ]))
        ));

        // Pre-surrogate baselines keep early cycles scoreable.
        let provisional = provisional_predictions(&self.config.bench, rng);
        let provisional_score = safe_utility(
            &self.config.score,
            &ScoreInputs {
                delta_linf_hat: provisional.delta_linf.point,
                mdl_gain_hat: provisional.mdl_gain.point,
                ppl_ood_hat: provisional.ppl_ood.point,
                cost: bench.cost,
                risk: bench.risk,
                caos_post: state.caos_post,
                sr_score: state.sr_score,
                tr_distance: distance,
                tr_radius: state.trust_region_radius,
            },
        );

        let proof = ledger.record(
            EventKind::MutCandidate,
            json!({
                "cycle": cycle,
                "cand_id": cand_id.as_str(),
                "ops": op_seq,
                "distance": distance,
                "provisional_score": provisional_score,
            }),
        )?;
        budget.debit(bench);

        let features = extract(&self.space, genotype, bench, acq);
        let candidate = Candidate {
            cand_id,
            parent_ids: genotype.parents.clone(),
            op_seq,
            distance_to_base: distance,
            patches: build_patches(&params),
            build_steps: vec![
                "apply_patches".to_string(),
                "rebuild_adapters".to_string(),
                "smoke_check".to_string(),
            ],
            env_caps,
            pred_metrics: provisional,
            risk_estimate: bench.risk,
            cost_estimate: bench.cost,
            latency_estimate_ms: bench.latency_ms,
            score: provisional_score,
            explain: String::new(),
            proof_id: Some(proof),
        };

        Ok(Some(WorkingCandidate {
            candidate,
            features,
        }))
    }

    /// Computes the final safe-utility score from surrogate predictions.
    fn final_score(&self, state: &SystemState, candidate: &Candidate) -> f64 {
        safe_utility(
            &self.config.score,
            &ScoreInputs {
                delta_linf_hat: candidate.pred_metrics.delta_linf.point,
                mdl_gain_hat: candidate.pred_metrics.mdl_gain.point,
                ppl_ood_hat: candidate.pred_metrics.ppl_ood.point,
                cost: candidate.cost_estimate,
                risk: candidate.risk_estimate,
                caos_post: state.caos_post,
                sr_score: state.sr_score,
                tr_distance: candidate.distance_to_base,
                tr_radius: state.trust_region_radius,
            },
        )
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Derives the cycle identifier from the plan hash.
fn cycle_id(plan_hash: &str) -> String {
    format!("cyc_{}", short_hex(plan_hash))
}

/// Returns the first twelve hex characters of a digest.
fn short_hex(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Derives candidate resource ceilings from its concrete parameters.
fn derive_env_caps(
    params: &std::collections::BTreeMap<String, ParamValue>,
    limits: SandboxLimits,
) -> EnvCaps {
    let batch = params
        .get("batch")
        .and_then(ParamValue::as_f64)
        .unwrap_or(1.0)
        .max(1.0);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "batch is bounded by the gene range"
    )]
    let max_memory_mb = (128.0 + batch * 2.0).min(limits.memory_limit_mb as f64) as u64;
    EnvCaps {
        max_memory_mb,
        max_wall_s: limits.timeout_ms / 1_000,
        cpu_cores: 1,
    }
}

/// Builds the candidate's patch set from its concrete parameters.
fn build_patches(params: &std::collections::BTreeMap<String, ParamValue>) -> Vec<Patch> {
    let payload: serde_json::Map<String, Value> = params
        .iter()
        .map(|(name, value)| {
            let rendered = match value {
                ParamValue::Float(v) => json!(v),
                ParamValue::Int(v) => json!(v),
                ParamValue::Flag(v) => json!(v),
                ParamValue::Choice(v) => json!(v),
            };
            (name.clone(), rendered)
        })
        .collect();
    vec![Patch {
        path: "config/learner.json".to_string(),
        payload: Value::Object(payload),
    }]
}

/// Builds deterministic pre-surrogate predictions.
fn provisional_predictions(profile: &BenchProfile, rng: &mut DetRng) -> PredictionSet {
    let jitter = rng.uniform();
    let delta = profile.prediction_baseline + 0.01 * jitter;
    let mdl = profile.prediction_baseline + 0.01 * rng.uniform();
    let ppl = profile.ppl_baseline * (1.0 - 0.05 * rng.uniform());
    let band = |point: f64| crate::surrogate::Prediction {
        point,
        ci_lo: point * 0.85,
        ci_hi: point * 1.15,
    };
    PredictionSet {
        delta_linf: band(delta),
        mdl_gain: band(mdl),
        ppl_ood: band(ppl.max(1.0)),
    }
}

/// Builds the human-facing scoring explanation.
fn explain_line(candidate: &Candidate) -> String {
    format!(
        "ops={} dist={:.3} gain={:.4} cost={:.3} risk={:.3} score={:.4}",
        candidate.op_seq.join("+"),
        candidate.distance_to_base,
        candidate.pred_metrics.delta_linf.point,
        candidate.cost_estimate,
        candidate.risk_estimate,
        candidate.score,
    )
}

/// Applies the post-selection state projection.
fn apply_state_update(
    state: &mut SystemState,
    plan_hash: &str,
    start_proof: &str,
    selected: &[Candidate],
) -> Result<(), HashError> {
    #[allow(clippy::cast_precision_loss, reason = "bundle sizes are tiny")]
    let count = selected.len().max(1) as f64;
    state.delta_linf_pred =
        selected.iter().map(|c| c.pred_metrics.delta_linf.point).sum::<f64>() / count;
    state.mdl_gain_pred =
        selected.iter().map(|c| c.pred_metrics.mdl_gain.point).sum::<f64>() / count;
    state.ppl_ood_pred =
        selected.iter().map(|c| c.pred_metrics.ppl_ood.point).sum::<f64>() / count;

    let cand_ids: Vec<&str> = selected.iter().map(|c| c.cand_id.as_str()).collect();
    state.hashes.push(plan_hash.to_string());
    state.hashes.push(hash_canonical_json(&cand_ids)?);

    state.proof_ids.push(start_proof.to_string());
    for candidate in selected.iter().take(3) {
        if let Some(proof) = candidate.proof_id.as_ref() {
            state.proof_ids.push(proof.clone());
        }
    }

    for candidate in selected {
        for patch in &candidate.patches {
            if let Some(map) = patch.payload.as_object() {
                let on = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(false);
                state.capabilities.quantization |= on("quant");
                state.capabilities.pruning |= on("pruning");
                state.capabilities.rag_rerank |= on("rag_rerank");
                state.capabilities.self_check |= on("self_check");
            }
        }
    }

    state.cycle_count += 1;
    Ok(())
}
