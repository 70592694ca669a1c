//! Local process backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::LabError;
use crate::testing::{JobOutput, JobRunner, JobSpec};

/// Runs each job as a local process.
///
/// The image is ignored; stdout and stderr are concatenated into the logs.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner {
    working_dir: Option<PathBuf>,
}

impl LocalRunner {
    /// Create a runner that uses the current directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run jobs from the given directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl JobRunner for LocalRunner {
    async fn run_job(&self, spec: &JobSpec) -> Result<JobOutput> {
        let (program, args) = spec
            .args
            .split_first()
            .ok_or_else(|| LabError::job_failed(&spec.name, "empty command"))?;

        debug!("Running local job {}: {:?}", spec.name, spec.args);

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to start local job '{}'", spec.name))?;

        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(output) => output.with_context(|| format!("Failed to wait for '{}'", spec.name))?,
            Err(_) => {
                return Err(LabError::JobTimeout {
                    job: spec.name.clone(),
                    timeout_secs: spec.timeout.as_secs(),
                }
                .into())
            }
        };

        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !logs.is_empty() && !logs.ends_with('\n') {
                logs.push('\n');
            }
            logs.push_str(&stderr);
        }

        Ok(JobOutput {
            succeeded: output.status.success(),
            logs,
            exit_code: output.status.code(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
