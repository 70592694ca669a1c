//! Test plan documents.
//!
//! A test plan describes one ramped load test: the workload to run, the
//! target rate of each stage, the plateau policy that may cut the ramp
//! short, and how the stages are executed.
//!
//! # Example plan
//!
//! ```toml
//! [plan]
//! name = "broker-ramp"
//!
//! [workload]
//! image = "ghcr.io/example/loadgen:1.4"
//! command = ["loadgen", "--rate", "{rate}", "--duration", "{duration}"]
//!
//! [ramp]
//! start_rate = 1000
//! step = 1000
//! stages = 8
//! duration_secs = 60
//!
//! [plateau]
//! min_improvement_percent = 10.0
//! consecutive_steps_required = 2
//! ```

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{LabError, Result};
use crate::plateau::PlateauPolicy;

/// Placeholder replaced by a stage's target rate.
pub const RATE_PLACEHOLDER: &str = "{rate}";
/// Placeholder replaced by a stage's duration in seconds.
pub const DURATION_PLACEHOLDER: &str = "{duration}";
/// Placeholder replaced by a stage's 1-based index.
pub const STAGE_PLACEHOLDER: &str = "{stage}";

/// Default key the workload prints its throughput under.
pub const DEFAULT_THROUGHPUT_KEY: &str = "throughput";

/// Largest number of stages a plan may expand to.
pub const MAX_STAGES: usize = 1000;

// ============================================================================
// Document
// ============================================================================

/// A parsed and validated test plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
    pub plan: PlanInfo,
    pub workload: WorkloadSpec,
    #[serde(default)]
    pub ramp: Option<RampSpec>,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub plateau: PlateauSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// What to run for each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Container image (required for the kubernetes backend).
    #[serde(default)]
    pub image: Option<String>,
    /// Command template; may contain `{rate}`, `{duration}` and `{stage}`.
    pub command: Vec<String>,
    /// The workload prints `<key>=<number>` (or `<key>: <number>`).
    #[serde(default = "default_throughput_key")]
    pub throughput_key: String,
    /// Extra environment for the workload.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_throughput_key() -> String {
    DEFAULT_THROUGHPUT_KEY.to_string()
}

/// Evenly spaced stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampSpec {
    pub start_rate: f64,
    pub step: f64,
    pub stages: usize,
    pub duration_secs: u64,
}

/// One explicitly listed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub target_rate: f64,
    pub duration_secs: u64,
}

/// `[plateau]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateauSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_improvement")]
    pub min_improvement_percent: f64,
    #[serde(default = "default_consecutive_steps")]
    pub consecutive_steps_required: usize,
}

fn default_true() -> bool {
    true
}

fn default_min_improvement() -> f64 {
    PlateauPolicy::default().min_improvement_percent()
}

fn default_consecutive_steps() -> usize {
    PlateauPolicy::default().consecutive_steps_required()
}

impl Default for PlateauSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_improvement_percent: default_min_improvement(),
            consecutive_steps_required: default_consecutive_steps(),
        }
    }
}

impl PlateauSettings {
    /// Builds the validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InvalidPolicy`] for an invalid policy.
    pub fn policy(&self) -> Result<PlateauPolicy> {
        PlateauPolicy::new(self.min_improvement_percent, self.consecutive_steps_required)
    }
}

/// `[execution]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default)]
    pub mode: ModeSetting,
    /// `auto` mode switches to batch at or above this many stages.
    #[serde(default = "default_batch_min_stages")]
    pub batch_min_stages: usize,
    #[serde(default)]
    pub backend: Backend,
}

fn default_batch_min_stages() -> usize {
    3
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            mode: ModeSetting::default(),
            batch_min_stages: default_batch_min_stages(),
            backend: Backend::default(),
        }
    }
}

/// Requested execution mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    /// Pick based on stage count.
    #[default]
    Auto,
    /// One job per stage.
    Sequential,
    /// All stages inside one job.
    Batch,
}

/// Resolved execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Batch,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

/// Where jobs run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Kubernetes Jobs through kubectl.
    #[default]
    Kubernetes,
    /// Local processes.
    Local,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kubernetes => write!(f, "kubernetes"),
            Self::Local => write!(f, "local"),
        }
    }
}

// ============================================================================
// Stages
// ============================================================================

/// A concrete stage ready to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// 1-based position in the ramp.
    pub index: usize,
    pub target_rate: f64,
    pub duration_secs: u64,
}

impl StageSpec {
    /// Substitutes this stage's values into a command template.
    ///
    /// ```
    /// use labramp::plan::StageSpec;
    ///
    /// let stage = StageSpec { index: 2, target_rate: 1500.0, duration_secs: 30 };
    /// let template = vec!["gen".to_string(), "--rate={rate}".to_string(), "{duration}s".to_string()];
    /// assert_eq!(stage.render_command(&template), vec!["gen", "--rate=1500", "30s"]);
    /// ```
    #[must_use]
    pub fn render_command(&self, template: &[String]) -> Vec<String> {
        template
            .iter()
            .map(|arg| {
                arg.replace(RATE_PLACEHOLDER, &self.target_rate.to_string())
                    .replace(DURATION_PLACEHOLDER, &self.duration_secs.to_string())
                    .replace(STAGE_PLACEHOLDER, &self.index.to_string())
            })
            .collect()
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl TestPlan {
    /// Load and validate a plan from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed or invalid.
    pub fn from_file(path: &Path) -> Result<Self> {
        let plan = Self::load_unvalidated(path)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse a plan file without validating it.
    ///
    /// Callers that override fields (such as the backend) must call
    /// [`TestPlan::validate`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or not valid TOML.
    pub fn load_unvalidated(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LabError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse and validate a plan from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is malformed or the plan is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let plan: TestPlan = toml::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Plan name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.plan.name
    }

    /// Validates the plan.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InvalidPlan`] or [`LabError::InvalidPolicy`] for
    /// the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.plan.name.trim().is_empty() {
            return Err(LabError::invalid_plan("plan.name", "must not be empty"));
        }
        if self.slug().is_empty() {
            return Err(LabError::invalid_plan(
                "plan.name",
                "must contain at least one letter or digit",
            ));
        }
        if self.workload.command.is_empty() {
            return Err(LabError::invalid_plan(
                "workload.command",
                "must not be empty",
            ));
        }
        let key = &self.workload.throughput_key;
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(LabError::invalid_plan(
                "workload.throughput_key",
                "may only contain letters, digits and '_'",
            ));
        }
        if self.execution.backend == Backend::Kubernetes
            && self
                .workload
                .image
                .as_deref()
                .is_none_or(|image| image.trim().is_empty())
        {
            return Err(LabError::invalid_plan(
                "workload.image",
                "required for the kubernetes backend",
            ));
        }
        if let Some(ramp) = &self.ramp {
            if ramp.stages == 0 {
                return Err(LabError::invalid_plan("ramp.stages", "must be at least 1"));
            }
            if ramp.stages > MAX_STAGES {
                return Err(LabError::invalid_plan(
                    "ramp.stages",
                    format!("must be at most {}, got {}", MAX_STAGES, ramp.stages),
                ));
            }
            if !ramp.step.is_finite() || ramp.step < 0.0 {
                return Err(LabError::invalid_plan(
                    "ramp.step",
                    "must be a non-negative number",
                ));
            }
        }

        if self.stages.len() > MAX_STAGES {
            return Err(LabError::invalid_plan(
                "stages",
                format!("at most {} entries allowed, got {}", MAX_STAGES, self.stages.len()),
            ));
        }

        let stages = self.stages();
        if stages.is_empty() {
            return Err(LabError::invalid_plan(
                "stages",
                "define [ramp] or at least one [[stages]] entry",
            ));
        }
        for stage in &stages {
            if !stage.target_rate.is_finite() || stage.target_rate <= 0.0 {
                return Err(LabError::invalid_plan(
                    format!("stage {}", stage.index),
                    format!("target rate must be positive, got {}", stage.target_rate),
                ));
            }
            if stage.duration_secs == 0 {
                return Err(LabError::invalid_plan(
                    format!("stage {}", stage.index),
                    "duration must be greater than 0",
                ));
            }
        }

        self.plateau.policy()?;
        Ok(())
    }

    /// Concrete stages: explicit `[[stages]]` win over `[ramp]`.
    #[must_use]
    pub fn stages(&self) -> Vec<StageSpec> {
        if !self.stages.is_empty() {
            return self
                .stages
                .iter()
                .enumerate()
                .map(|(i, s)| StageSpec {
                    index: i + 1,
                    target_rate: s.target_rate,
                    duration_secs: s.duration_secs,
                })
                .collect();
        }
        match &self.ramp {
            Some(ramp) => (0..ramp.stages)
                .map(|i| StageSpec {
                    index: i + 1,
                    target_rate: ramp.start_rate + ramp.step * i as f64,
                    duration_secs: ramp.duration_secs,
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// The plateau policy, or `None` when early stopping is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InvalidPolicy`] for an invalid policy.
    pub fn plateau_policy(&self) -> Result<Option<PlateauPolicy>> {
        if self.plateau.enabled {
            self.plateau.policy().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Decides between one job per stage and a single batch job.
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        self.resolve_mode(self.execution.mode)
    }

    /// Resolves a requested mode against this plan.
    ///
    /// A single stage always runs sequentially.
    #[must_use]
    pub fn resolve_mode(&self, requested: ModeSetting) -> ExecutionMode {
        let count = self.stages().len();
        if count <= 1 {
            return ExecutionMode::Sequential;
        }
        match requested {
            ModeSetting::Sequential => ExecutionMode::Sequential,
            ModeSetting::Batch => ExecutionMode::Batch,
            ModeSetting::Auto if count >= self.execution.batch_min_stages => ExecutionMode::Batch,
            ModeSetting::Auto => ExecutionMode::Sequential,
        }
    }

    /// DNS-label friendly form of the plan name.
    #[must_use]
    pub fn slug(&self) -> String {
        slugify(&self.plan.name)
    }
}

/// Lowercases, maps other characters to '-', collapses runs and trims.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Starter plan written by `labramp init`.
#[must_use]
pub fn sample_plan(name: &str) -> String {
    format!(
        r#"# labramp test plan
[plan]
name = "{name}"
description = "Ramp the producer until throughput stops improving"

[workload]
image = "ghcr.io/example/loadgen:latest"
# {{rate}}, {{duration}} and {{stage}} are replaced per stage.
command = ["loadgen", "--rate", "{{rate}}", "--duration", "{{duration}}"]
# The workload must print a line such as "throughput=1234.5".
throughput_key = "throughput"

[workload.env]
TARGET = "broker-0.broker:9092"

[ramp]
start_rate = 1000
step = 1000
stages = 8
duration_secs = 60

[plateau]
enabled = true
min_improvement_percent = 10.0
consecutive_steps_required = 2

[execution]
mode = "auto"          # auto | sequential | batch
batch_min_stages = 3
backend = "kubernetes" # kubernetes | local
"#
    )
}
