//! Mock implementations of testing traits.
//!
//! These mocks provide controllable test doubles for job backends,
//! enabling deterministic unit tests of the execution state machine.

use super::traits::{JobOutput, JobRunner, JobSpec};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Mock job backend that replays scripted responses in order.
///
/// Every submitted spec is recorded for later inspection.
///
/// # Example
///
/// ```rust,ignore
/// let runner = MockJobRunner::new()
///     .with_output("throughput=100")
///     .with_failure("OOMKilled");
///
/// let first = runner.run_job(&spec).await?;
/// assert!(first.succeeded);
/// assert_eq!(runner.call_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockJobRunner {
    responses: Mutex<VecDeque<std::result::Result<JobOutput, String>>>,
    submitted: Mutex<Vec<JobSpec>>,
}

impl MockJobRunner {
    /// Create a mock with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose jobs print the given throughputs, one per job.
    #[must_use]
    pub fn with_throughputs(values: &[f64]) -> Self {
        values
            .iter()
            .fold(Self::new(), |mock, v| mock.with_output(&format!("throughput={v}")))
    }

    /// Queue a successful job with the given logs.
    #[must_use]
    pub fn with_output(self, logs: &str) -> Self {
        self.push(Ok(JobOutput::success(logs)));
        self
    }

    /// Queue a failed job with the given logs.
    #[must_use]
    pub fn with_failure(self, logs: &str) -> Self {
        self.push(Ok(JobOutput::failure(logs, Some(1))));
        self
    }

    /// Queue a backend error.
    #[must_use]
    pub fn with_error(self, error: &str) -> Self {
        self.push(Err(error.to_string()));
        self
    }

    fn push(&self, response: std::result::Result<JobOutput, String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    /// Number of jobs submitted so far.
    pub fn call_count(&self) -> usize {
        self.submitted.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Specs of every submitted job, in order.
    pub fn submitted(&self) -> Vec<JobSpec> {
        self.submitted.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl JobRunner for MockJobRunner {
    async fn run_job(&self, spec: &JobSpec) -> Result<JobOutput> {
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(spec.clone());
        }

        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());

        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(error)) => bail!("{}", error),
            None => bail!("No scripted response left for job '{}'", spec.name),
        }
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}
