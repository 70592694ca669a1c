//! Trait definitions for testable abstractions.
//!
//! These traits abstract the job backends so the execution state machine
//! can be unit tested without a cluster or real subprocesses.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// A unit of work submitted to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Unique job name (DNS-label safe).
    pub name: String,
    /// Container image; ignored by the local backend.
    pub image: Option<String>,
    /// Program and arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// How long the job may run before it is abandoned.
    pub timeout: Duration,
}

impl JobSpec {
    /// Create a job spec with no image and no extra environment.
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            image: None,
            args,
            env: BTreeMap::new(),
            timeout,
        }
    }

    /// Set the container image.
    #[must_use]
    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    /// Set the extra environment.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// What a finished job left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    /// Whether the job completed successfully.
    pub succeeded: bool,
    /// Combined log output.
    pub logs: String,
    /// Process exit code, when the backend exposes one.
    pub exit_code: Option<i32>,
}

impl JobOutput {
    /// Create a successful output.
    #[must_use]
    pub fn success(logs: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            logs: logs.into(),
            exit_code: Some(0),
        }
    }

    /// Create a failed output.
    #[must_use]
    pub fn failure(logs: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            succeeded: false,
            logs: logs.into(),
            exit_code,
        }
    }
}

/// Abstraction over where load-test jobs run.
///
/// Implementations block until the job has finished (or timed out) and
/// return its logs. A job that ran but failed is `Ok` with
/// `succeeded == false`; `Err` is reserved for not being able to run or
/// observe the job at all.
///
/// # Example
///
/// ```rust,ignore
/// use labramp::testing::{JobRunner, JobSpec};
///
/// async fn smoke(runner: &impl JobRunner) -> anyhow::Result<bool> {
///     let spec = JobSpec::new("smoke", vec!["true".into()], Duration::from_secs(5));
///     Ok(runner.run_job(&spec).await?.succeeded)
/// }
/// ```
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run a job to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be started, observed, or does not
    /// finish within its timeout.
    async fn run_job(&self, spec: &JobSpec) -> Result<JobOutput>;

    /// Short backend name for logs and reports.
    fn backend_name(&self) -> &'static str;
}
