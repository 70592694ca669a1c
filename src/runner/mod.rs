//! Test-plan execution.
//!
//! [`PlanRunner`] drives a plan through a [`JobRunner`] backend in one of
//! two modes:
//!
//! - **Sequential**: one job per stage. The controller parses each job's
//!   throughput, records it and stops as soon as the history plateaus.
//! - **Batch**: one job runs every stage and evaluates the plateau check in
//!   the shell (see [`batch`]). The controller rebuilds the stage results
//!   from marker lines and re-checks the decision natively.
//!
//! Stage failures do not abort with an error: they end the run with
//! [`StopReason::StageFailed`] so a report can still be written.

pub mod batch;
pub mod state;
pub mod throughput;

pub use batch::{parse_batch_log, render_batch_script, BatchLog, BatchStage};
pub use state::{RunOutcome, RunState, StageResult, StopReason};
pub use throughput::{extract_throughput, throughput_pattern};

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LabConfig;
use crate::error::LabError;
use crate::plan::{ExecutionMode, ModeSetting, StageSpec, TestPlan};
use crate::plateau::{
    improvement_percent, is_plateaued, PlateauDecision, PlateauPolicy, PlateauTracker,
    ThroughputHistory,
};
use crate::testing::{JobOutput, JobRunner, JobSpec};

/// Kubernetes object names are DNS labels.
const MAX_JOB_NAME_LEN: usize = 63;

/// Length of the run id prefix embedded in job names.
const RUN_ID_PREFIX_LEN: usize = 8;

/// Knobs for a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Overrides the plan's `[execution] mode`.
    pub mode: Option<ModeSetting>,
    /// Slack added on top of the scheduled stage time before a job is
    /// abandoned.
    pub job_timeout: Duration,
    /// Fixed run id; a random one is generated when unset.
    pub run_id: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: None,
            job_timeout: Duration::from_secs(1800),
            run_id: None,
        }
    }
}

impl RunOptions {
    /// Options taking the job timeout from configuration.
    #[must_use]
    pub fn from_config(config: &LabConfig) -> Self {
        Self {
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Option<ModeSetting>) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Executes one test plan against a backend.
///
/// # Example
///
/// ```rust,ignore
/// let backend = LocalRunner::new();
/// let outcome = PlanRunner::new(&plan, &backend, RunOptions::default())
///     .run()
///     .await?;
/// println!("{}", outcome.stop_reason);
/// ```
pub struct PlanRunner<'a, R: JobRunner + ?Sized> {
    plan: &'a TestPlan,
    runner: &'a R,
    options: RunOptions,
    run_id: String,
    mode: ExecutionMode,
}

impl<'a, R: JobRunner + ?Sized> PlanRunner<'a, R> {
    /// Create a runner; resolves the execution mode and run id up front.
    pub fn new(plan: &'a TestPlan, runner: &'a R, options: RunOptions) -> Self {
        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let mode = plan.resolve_mode(options.mode.unwrap_or(plan.execution.mode));
        Self {
            plan,
            runner,
            options,
            run_id,
            mode,
        }
    }

    /// The id shared by every job of this run.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The resolved execution mode.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Job specs that [`run`](Self::run) would submit if no stage stopped
    /// the ramp early.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan's plateau policy is invalid.
    pub fn dry_run(&self) -> Result<Vec<JobSpec>> {
        let stages = self.plan.stages();
        match self.mode {
            ExecutionMode::Sequential => Ok(stages.iter().map(|s| self.stage_job(s)).collect()),
            ExecutionMode::Batch => {
                let policy = self.plan.plateau_policy()?;
                Ok(vec![self.batch_job(&stages, policy.as_ref())])
            }
        }
    }

    /// Run the plan to completion, plateau or first failure.
    ///
    /// # Errors
    ///
    /// Returns an error only when the plan itself is unusable. Backend and
    /// stage failures are reported through [`StopReason::StageFailed`].
    pub async fn run(&self) -> Result<RunOutcome> {
        let stages = self.plan.stages();
        let policy = self
            .plan
            .plateau_policy()
            .context("Invalid plateau policy")?;
        let pattern = throughput_pattern(&self.plan.workload.throughput_key)
            .context("Invalid throughput key")?;

        info!(
            "Starting plan '{}' (run {}, {} stages, {} mode, {} backend)",
            self.plan.name(),
            self.run_id,
            stages.len(),
            self.mode,
            self.runner.backend_name()
        );
        if let Some(policy) = &policy {
            info!("Plateau policy: {}", policy);
        }

        let started_at = Utc::now();
        let (results, stop_reason) = match self.mode {
            ExecutionMode::Sequential => self.run_sequential(&stages, policy, &pattern).await,
            ExecutionMode::Batch => self.run_batch(&stages, policy).await,
        };
        let finished_at = Utc::now();

        info!(
            "Plan '{}' {}: {}",
            self.plan.name(),
            stop_reason.final_state(),
            stop_reason
        );

        let history = results.iter().map(|r| r.throughput).collect();
        Ok(RunOutcome {
            run_id: self.run_id.clone(),
            plan_name: self.plan.name().to_string(),
            mode: self.mode,
            backend: self.runner.backend_name().to_string(),
            planned_stages: stages.len(),
            stages: results,
            history: ThroughputHistory::from_values(history),
            stop_reason,
            started_at,
            finished_at,
        })
    }

    // ========================================================================
    // Sequential
    // ========================================================================

    async fn run_sequential(
        &self,
        stages: &[StageSpec],
        policy: Option<PlateauPolicy>,
        pattern: &Regex,
    ) -> (Vec<StageResult>, StopReason) {
        let mut tracker = policy.map(PlateauTracker::new);
        let mut results: Vec<StageResult> = Vec::with_capacity(stages.len());

        for (position, stage) in stages.iter().enumerate() {
            info!(
                "Stage {}/{}: target rate {}",
                stage.index,
                stages.len(),
                stage.target_rate
            );

            let spec = self.stage_job(stage);
            let output = match self.runner.run_job(&spec).await {
                Ok(output) => output,
                Err(e) => return (results, self.stage_failed(stage.index, format!("{e:#}"))),
            };
            let key = &self.plan.workload.throughput_key;
            let throughput = match stage_throughput(&output, pattern, key, stage.index) {
                Ok(value) => value,
                Err(message) => return (results, self.stage_failed(stage.index, message)),
            };

            let result = stage_result(stage, throughput, results.last());
            info!(
                "Stage {} throughput: {:.2}{}",
                stage.index,
                throughput,
                result
                    .improvement_percent
                    .map(|p| format!(" ({:+.2}%)", p))
                    .unwrap_or_default()
            );
            results.push(result);

            let is_last = position + 1 == stages.len();
            if let Some(tracker) = tracker.as_mut() {
                let decision = tracker.record(throughput);
                if let PlateauDecision::Plateau { baseline, .. } = decision {
                    if !is_last {
                        return (
                            results,
                            StopReason::Plateau {
                                stage: stage.index,
                                baseline,
                            },
                        );
                    }
                }
            }
        }

        (results, StopReason::Completed)
    }

    // ========================================================================
    // Batch
    // ========================================================================

    async fn run_batch(
        &self,
        stages: &[StageSpec],
        policy: Option<PlateauPolicy>,
    ) -> (Vec<StageResult>, StopReason) {
        let spec = self.batch_job(stages, policy.as_ref());
        info!(
            "Submitting batch job {} with {} stages",
            spec.name,
            stages.len()
        );

        let output = match self.runner.run_job(&spec).await {
            Ok(output) => output,
            Err(e) => {
                let first = stages.first().map_or(1, |s| s.index);
                return (Vec::new(), self.stage_failed(first, format!("{e:#}")));
            }
        };

        let log = parse_batch_log(&output.logs);
        let mut results: Vec<StageResult> = Vec::with_capacity(log.stages.len());
        for reported in &log.stages {
            let Some(stage) = stages.iter().find(|s| s.index == reported.index) else {
                warn!("Ignoring result for unknown stage {}", reported.index);
                continue;
            };
            let result = stage_result(stage, reported.throughput, results.last());
            info!("Stage {} throughput: {:.2}", stage.index, reported.throughput);
            results.push(result);
        }
        let history: Vec<f64> = results.iter().map(|r| r.throughput).collect();

        if let Some(policy) = &policy {
            cross_check(&history, stages.len(), policy, log.plateau_at);
        }

        let next_stage = results.last().map_or_else(
            || stages.first().map_or(1, |s| s.index),
            |r| r.index + 1,
        );

        let stop_reason = if let Some((stage, reason)) = log.failed {
            let key = &self.plan.workload.throughput_key;
            self.stage_failed(stage, failure_message(stage, &reason, key))
        } else if let Some(stage) = log.plateau_at {
            let baseline = policy
                .map(|p| plateau_baseline(&history, &p))
                .unwrap_or_default();
            StopReason::Plateau { stage, baseline }
        } else if log.done {
            StopReason::Completed
        } else if !output.succeeded {
            self.stage_failed(
                next_stage,
                format!("batch job failed (exit code {:?})", output.exit_code),
            )
        } else {
            self.stage_failed(
                next_stage,
                "batch job ended without a completion marker".to_string(),
            )
        };

        (results, stop_reason)
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    fn job_name(&self, suffix: &str) -> String {
        let run: String = self.run_id.chars().take(RUN_ID_PREFIX_LEN).collect();
        let tail = format!("-{}-{}", run, suffix);
        let room = MAX_JOB_NAME_LEN.saturating_sub(tail.len());
        let slug: String = self.plan.slug().chars().take(room).collect();
        format!("{}{}", slug.trim_end_matches('-'), tail)
    }

    fn stage_job(&self, stage: &StageSpec) -> JobSpec {
        let timeout = self.options.job_timeout + Duration::from_secs(stage.duration_secs);
        JobSpec::new(
            self.job_name(&format!("s{}", stage.index)),
            stage.render_command(&self.plan.workload.command),
            timeout,
        )
        .with_image(self.plan.workload.image.clone())
        .with_env(self.plan.workload.env.clone())
    }

    fn batch_job(&self, stages: &[StageSpec], policy: Option<&PlateauPolicy>) -> JobSpec {
        let scheduled: u64 = stages.iter().map(|s| s.duration_secs).sum();
        let script = render_batch_script(self.plan, stages, policy);
        JobSpec::new(
            self.job_name("batch"),
            vec!["sh".to_string(), "-c".to_string(), script],
            self.options.job_timeout + Duration::from_secs(scheduled),
        )
        .with_image(self.plan.workload.image.clone())
        .with_env(self.plan.workload.env.clone())
    }

    fn stage_failed(&self, stage: usize, message: String) -> StopReason {
        warn!("Stage {} failed: {}", stage, message);
        StopReason::StageFailed { stage, message }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn stage_throughput(
    output: &JobOutput,
    pattern: &Regex,
    key: &str,
    stage: usize,
) -> std::result::Result<f64, String> {
    if !output.succeeded {
        let tail = output.logs.lines().last().unwrap_or_default();
        return Err(match output.exit_code {
            Some(code) => format!("job exited with code {}: {}", code, tail),
            None => format!("job failed: {}", tail),
        });
    }
    extract_throughput(pattern, &output.logs).ok_or_else(|| throughput_not_found(stage, key))
}

fn stage_result(stage: &StageSpec, throughput: f64, previous: Option<&StageResult>) -> StageResult {
    StageResult {
        index: stage.index,
        target_rate: stage.target_rate,
        throughput,
        improvement_percent: previous
            .filter(|p| p.throughput > 0.0)
            .map(|p| improvement_percent(p.throughput, throughput)),
        duration_secs: stage.duration_secs,
    }
}

fn throughput_not_found(stage: usize, key: &str) -> String {
    LabError::ThroughputNotFound {
        stage,
        key: key.to_string(),
    }
    .to_string()
}

fn failure_message(stage: usize, reason: &str, key: &str) -> String {
    match reason {
        "exit" => "workload exited with a non-zero status".to_string(),
        "no-throughput" => throughput_not_found(stage, key),
        other => other.to_string(),
    }
}

/// Value the plateau window was measured against, or 0 if the history is
/// too short to have one.
fn plateau_baseline(history: &[f64], policy: &PlateauPolicy) -> f64 {
    history
        .len()
        .checked_sub(policy.min_history_len())
        .map_or(0.0, |i| history[i])
}

/// The stage a native check would have stopped after, if any.
fn native_plateau_stage(history: &[f64], planned: usize, policy: &PlateauPolicy) -> Option<usize> {
    (1..=history.len())
        .filter(|&n| n < planned)
        .find(|&n| is_plateaued(&history[..n], policy))
}

/// Warn when the job's own plateau decision differs from the native one.
fn cross_check(history: &[f64], planned: usize, policy: &PlateauPolicy, remote: Option<usize>) {
    let native = native_plateau_stage(history, planned, policy);
    if native != remote {
        warn!(
            "Plateau decision mismatch: batch job reported {:?}, native check gives {:?} for history {:?}",
            remote, native, history
        );
    } else {
        debug!("Batch plateau decision confirmed: {:?}", remote);
    }
}
