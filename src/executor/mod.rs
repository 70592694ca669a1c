//! Job backends.
//!
//! Real implementations of [`JobRunner`](crate::testing::JobRunner):
//!
//! - [`KubectlRunner`] submits Kubernetes Jobs through the `kubectl` CLI and
//!   polls them to completion.
//! - [`LocalRunner`] runs the workload as a local process.
//!
//! Calls to external CLIs are retried a few times with capped exponential
//! backoff before giving up.

pub mod kubectl;
pub mod local;

pub use kubectl::{parse_job_status, JobStatus, KubectlRunner};
pub use local::LocalRunner;

use std::time::Duration;

use crate::config::LabConfig;
use crate::error::Result;
use crate::plan::Backend;
use crate::testing::JobRunner;

// ============================================================================
// Backoff Constants and Calculation
// ============================================================================

/// Base backoff delay in milliseconds between CLI retries.
pub const RETRY_BACKOFF_BASE_MS: u64 = 1000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Multiplier for exponential backoff.
pub const BACKOFF_MULTIPLIER: u64 = 2;

/// Calculate the delay before retry `attempt` (1-indexed).
///
/// ```
/// use labramp::executor::calculate_backoff;
/// use std::time::Duration;
///
/// assert_eq!(calculate_backoff(1), Duration::from_millis(1000));
/// assert_eq!(calculate_backoff(3), Duration::from_millis(4000));
/// assert_eq!(calculate_backoff(30), Duration::from_millis(30_000));
/// ```
#[must_use]
pub fn calculate_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier = BACKOFF_MULTIPLIER.saturating_pow(exponent);
    let delay = RETRY_BACKOFF_BASE_MS.saturating_mul(multiplier);
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

/// Build the backend selected for a run.
///
/// # Errors
///
/// Returns [`LabError::MissingTool`](crate::error::LabError::MissingTool)
/// when the kubernetes backend is selected and kubectl cannot be found.
pub fn build_runner(backend: Backend, config: &LabConfig) -> Result<Box<dyn JobRunner>> {
    match backend {
        Backend::Kubernetes => {
            let runner = KubectlRunner::from_config(config);
            runner.ensure_available()?;
            Ok(Box::new(runner))
        }
        Backend::Local => Ok(Box::new(LocalRunner::new())),
    }
}
