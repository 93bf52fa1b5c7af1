//! Campaign loops over the runner and the store.
//!
//! A campaign is strictly sequential: at most one trial is in flight. Loops
//! check the [`CancelToken`] between trials, and an outcome that arrives
//! after cancellation is dropped rather than recorded, since the SUT was
//! most likely torn down by the same interrupt.

use std::io;
use std::time::Duration;

use faultline_model::{
    ConfigError, ConfigSampler, CorruptionScope, FaultConfig, MessageDrop, Partition,
    SamplerError, SamplerSettings, Shape, StratifiedGrid,
};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::logs::{TraceKind, TraceLog};
use crate::runner::{RunnerError, TrialExecutor, TrialOutcome};
use crate::store::{StoreError, StoreSummary, TrialCounts, TrialStatus, TrialStore};

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to write trial trace: {0}")]
    TraceLog(#[from] io::Error),
    #[error(
        "trial store is partially populated: shape {shape} has {found} trials, expected {expected} \
         (use a fresh campaign directory)"
    )]
    PartialPopulation {
        shape: Shape,
        expected: usize,
        found: usize,
    },
    #[error("shape {shape} has only {found} trials, {wanted} required")]
    TooFewTrials {
        shape: Shape,
        wanted: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignSettings {
    /// Failures without a pass that confirm a bug trigger.
    pub fail_threshold: u32,
    /// Pause between deflake polls when nothing is undecided.
    pub idle_interval: Duration,
    pub sampler: SamplerSettings,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            idle_interval: Duration::from_secs(5),
            sampler: SamplerSettings::default(),
        }
    }
}

/// Result of one fuzz or deflake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing left to deflake.
    Idle,
    /// Cancelled while the trial ran; nothing was recorded.
    Interrupted,
    Passed { id: i64 },
    Failed { id: i64, confirmed: bool },
}

/// Tally of a campaign loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    pub trials: u64,
    pub passed: u64,
    pub failed: u64,
    pub idle_polls: u64,
    /// Trials that crossed the fail threshold during this run.
    pub confirmed: Vec<i64>,
    pub interrupted: bool,
}

impl LoopReport {
    fn absorb(&mut self, step: StepOutcome) {
        match step {
            StepOutcome::Idle => self.idle_polls += 1,
            StepOutcome::Interrupted => self.interrupted = true,
            StepOutcome::Passed { .. } => {
                self.trials += 1;
                self.passed += 1;
            }
            StepOutcome::Failed { id, confirmed } => {
                self.trials += 1;
                self.failed += 1;
                if confirmed {
                    self.confirmed.push(id);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReproduceSummary {
    /// Trials added by this run; zero when resuming.
    pub inserted: usize,
    pub resumed: bool,
    pub deflake: LoopReport,
    pub store: StoreSummary,
}

pub struct Campaign<E, R> {
    store: TrialStore,
    executor: E,
    rng: R,
    log: TraceLog,
    settings: CampaignSettings,
    cancel: CancelToken,
}

impl<E: TrialExecutor, R: Rng> Campaign<E, R> {
    pub fn new(
        store: TrialStore,
        executor: E,
        rng: R,
        log: TraceLog,
        settings: CampaignSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            store,
            executor,
            rng,
            log,
            settings,
            cancel,
        }
    }

    pub fn store(&self) -> &TrialStore {
        &self.store
    }

    pub fn settings(&self) -> &CampaignSettings {
        &self.settings
    }

    /// Sample one config, run it once and record the outcome.
    pub fn fuzz_one(&mut self, sampler: &ConfigSampler) -> Result<StepOutcome, CampaignError> {
        let config = sampler.sample(&mut self.rng);
        let Some(outcome) = self.run(&config)? else {
            return Ok(StepOutcome::Interrupted);
        };
        let passed = resolve_verdict(&outcome);
        let counts = self.store.insert_with_outcome(&config, passed)?;
        let kind = TraceKind::Fuzz {
            execution: counts.pass + counts.fail,
        };
        let path = self.log.write(counts.id, kind, &outcome.trace)?;
        tracing::info!(
            id = counts.id,
            shape = %config.shape(),
            passed,
            trace = %path.display(),
            "fuzz trial"
        );
        Ok(self.step_result(counts, passed))
    }

    /// Re-run one undecided trial picked uniformly at random.
    pub fn deflake_one(&mut self) -> Result<StepOutcome, CampaignError> {
        let undecided = self.store.select_undecided(self.settings.fail_threshold)?;
        let Some(record) = undecided.choose(&mut self.rng) else {
            return Ok(StepOutcome::Idle);
        };
        let Some(outcome) = self.run(&record.config)? else {
            return Ok(StepOutcome::Interrupted);
        };
        let passed = resolve_verdict(&outcome);
        let counts = if passed {
            self.store.record_pass(record.id)?
        } else {
            self.store.record_fail(record.id)?
        };
        let path = self
            .log
            .write(record.id, TraceKind::Deflake { passed }, &outcome.trace)?;
        tracing::info!(
            id = record.id,
            passed,
            pass = counts.pass,
            fail = counts.fail,
            remaining = undecided.len(),
            trace = %path.display(),
            "deflake trial"
        );
        Ok(self.step_result(counts, passed))
    }

    /// Fuzz until cancelled or `iterations` trials have run.
    pub fn run_fuzz(&mut self, iterations: Option<u64>) -> Result<LoopReport, CampaignError> {
        let sampler = ConfigSampler::new(self.settings.sampler)?;
        self.store.bind_scope(self.settings.sampler.scope)?;
        let mut report = LoopReport::default();
        let mut n = 0;
        while !self.stop(&mut report, &mut n, iterations) {
            report.absorb(self.fuzz_one(&sampler)?);
        }
        Ok(report)
    }

    /// Deflake forever (or for `iterations` polls), idling when nothing
    /// is undecided.
    pub fn run_deflake(&mut self, iterations: Option<u64>) -> Result<LoopReport, CampaignError> {
        let mut report = LoopReport::default();
        let mut n = 0;
        while !self.stop(&mut report, &mut n, iterations) {
            let step = self.deflake_one()?;
            report.absorb(step);
            if step == StepOutcome::Idle {
                tracing::debug!(
                    secs = self.settings.idle_interval.as_secs_f64(),
                    "nothing to deflake"
                );
                self.cancel.sleep(self.settings.idle_interval);
            }
        }
        Ok(report)
    }

    /// Alternate one fuzz step with one deflake step.
    pub fn run_fuzz_deflake(
        &mut self,
        iterations: Option<u64>,
    ) -> Result<LoopReport, CampaignError> {
        let sampler = ConfigSampler::new(self.settings.sampler)?;
        self.store.bind_scope(self.settings.sampler.scope)?;
        let mut report = LoopReport::default();
        let mut n = 0;
        while !self.stop(&mut report, &mut n, iterations) {
            report.absorb(self.fuzz_one(&sampler)?);
            if self.cancel.is_cancelled() {
                continue;
            }
            report.absorb(self.deflake_one()?);
        }
        Ok(report)
    }

    /// Populate the stratified grid (or resume it) and deflake it to
    /// completion.
    pub fn reproduce(
        &mut self,
        grid_max: usize,
        repeats: usize,
    ) -> Result<ReproduceSummary, CampaignError> {
        let scope = self.settings.sampler.scope;
        self.store.bind_scope(scope)?;
        let inserted = self.populate_grid(scope, grid_max, repeats)?;
        let resumed = inserted == 0;

        let mut deflake = LoopReport::default();
        loop {
            if self.cancel.is_cancelled() {
                deflake.interrupted = true;
                break;
            }
            match self.deflake_one()? {
                StepOutcome::Idle => break,
                step => deflake.absorb(step),
            }
        }
        let store = self.store.summary(self.settings.fail_threshold)?;
        tracing::info!(
            confirmed = store.counts.confirmed,
            not_reproducible = store.counts.not_reproducible,
            undecided = store.counts.undecided,
            "reproduce finished"
        );
        Ok(ReproduceSummary {
            inserted,
            resumed,
            deflake,
            store,
        })
    }

    fn populate_grid(
        &mut self,
        scope: CorruptionScope,
        grid_max: usize,
        repeats: usize,
    ) -> Result<usize, CampaignError> {
        let expected = StratifiedGrid::expected(grid_max, repeats);
        let mut found = Vec::with_capacity(expected.len());
        for (shape, _) in &expected {
            found.push(self.store.count_by_shape(*shape)?);
        }

        if found.iter().all(|&n| n == 0) {
            let grid = StratifiedGrid::sample(&mut self.rng, scope, grid_max, repeats)?;
            let ids = self.store.insert_all(grid.configs(), true)?;
            tracing::info!(trials = ids.len(), grid_max, repeats, "stratified grid stored");
            return Ok(ids.len());
        }
        for ((shape, expected), found) in expected.iter().zip(&found) {
            if expected != found {
                return Err(CampaignError::PartialPopulation {
                    shape: *shape,
                    expected: *expected,
                    found: *found,
                });
            }
        }
        for (shape, expected) in &expected {
            if self.store.count_final_by_shape(*shape)? < *expected {
                let ids = self.store.first_ids_by_shape(*shape, *expected)?;
                let marked = self.store.mark_final(&ids)?;
                tracing::warn!(%shape, marked, "grid trials were not flagged final, repaired");
            }
        }
        tracing::info!(trials = found.iter().sum::<usize>(), "resuming stratified grid");
        Ok(0)
    }

    fn run(&mut self, config: &FaultConfig) -> Result<Option<TrialOutcome>, CampaignError> {
        let outcome = self.executor.execute(config)?;
        if self.cancel.is_cancelled() {
            tracing::info!(shape = %config.shape(), "trial interrupted, outcome discarded");
            return Ok(None);
        }
        if outcome.killed {
            tracing::debug!("SUT killed after its verdict");
        }
        Ok(Some(outcome))
    }

    fn step_result(&self, counts: TrialCounts, passed: bool) -> StepOutcome {
        if passed {
            return StepOutcome::Passed { id: counts.id };
        }
        let confirmed = counts.fail == self.settings.fail_threshold
            && counts.status(self.settings.fail_threshold) == TrialStatus::Confirmed;
        if confirmed {
            tracing::info!(id = counts.id, fail = counts.fail, "confirmed bug trigger");
        }
        StepOutcome::Failed {
            id: counts.id,
            confirmed,
        }
    }

    fn stop(&self, report: &mut LoopReport, n: &mut u64, iterations: Option<u64>) -> bool {
        if self.cancel.is_cancelled() {
            report.interrupted = true;
            return true;
        }
        if iterations.is_some_and(|max| *n >= max) {
            return true;
        }
        *n += 1;
        false
    }
}

/// Mark the first `per_shape` ids of every shape in the grid as final,
/// capped at the number of distinct configs the shape admits (as in
/// [`StratifiedGrid::target_size`]). Nothing is marked unless every shape
/// has enough trials.
pub fn tag_final(
    store: &TrialStore,
    grid_max: usize,
    per_shape: usize,
) -> Result<usize, CampaignError> {
    let mut ids = Vec::new();
    for (shape, wanted) in StratifiedGrid::expected(grid_max, per_shape) {
        let first = store.first_ids_by_shape(shape, wanted)?;
        if first.len() < wanted {
            return Err(CampaignError::TooFewTrials {
                shape,
                wanted,
                found: first.len(),
            });
        }
        ids.extend(first);
    }
    let marked = store.mark_final(&ids)?;
    tracing::info!(marked, grid_max, per_shape, "final sample tagged");
    Ok(marked)
}

/// A missing terminal record counts as a failure.
fn resolve_verdict(outcome: &TrialOutcome) -> bool {
    match outcome.verdict {
        Some(passed) => passed,
        None => {
            tracing::warn!(
                records = outcome.trace.len(),
                "SUT stream ended without a verdict, recording a failure"
            );
            false
        }
    }
}

/// One self-check of the harness against the SUT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickCheck {
    pub name: &'static str,
    pub expect_pass: bool,
    pub verdict: Option<bool>,
}

impl QuickCheck {
    pub fn ok(&self) -> bool {
        self.verdict == Some(self.expect_pass)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickTestReport {
    pub checks: Vec<QuickCheck>,
}

impl QuickTestReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(QuickCheck::ok)
    }
}

/// Sanity-check the harness wiring: fully isolating every replica during
/// the first prevote step must fail the trial, and no faults must pass it.
pub fn quick_tests<E: TrialExecutor>(executor: &mut E) -> Result<QuickTestReport, CampaignError> {
    let isolation = FaultConfig::new(
        vec![MessageDrop {
            step: 1,
            partition: Partition::new(vec![vec![0], vec![1], vec![2], vec![3]])?,
        }],
        vec![],
    );
    let cases = [
        ("isolation", isolation, false),
        ("no-faults", FaultConfig::default(), true),
    ];

    let mut checks = Vec::with_capacity(cases.len());
    for (name, config, expect_pass) in cases {
        let outcome = executor.execute(&config)?;
        let check = QuickCheck {
            name,
            expect_pass,
            verdict: outcome.verdict,
        };
        if check.ok() {
            tracing::info!(check = name, "quick test passed");
        } else {
            tracing::warn!(
                check = name,
                expected = expect_pass,
                verdict = ?outcome.verdict,
                "quick test failed"
            );
        }
        checks.push(check);
    }
    Ok(QuickTestReport { checks })
}
