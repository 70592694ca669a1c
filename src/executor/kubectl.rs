//! Kubernetes backend driven through the `kubectl` CLI.
//!
//! Each job is submitted as a `batch/v1` Job with a single container and
//! `backoffLimit: 0`, then polled with `kubectl get job -o json` until it
//! succeeds, fails or runs out of time. Logs are collected with
//! `kubectl logs job/<name>` and the job is deleted afterwards unless
//! `keep_jobs` is set.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::calculate_backoff;
use crate::config::LabConfig;
use crate::error::LabError;
use crate::testing::{JobOutput, JobRunner, JobSpec};

/// Label applied to every job labramp creates.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Terminal or non-terminal state of a Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Still pending or running.
    Active,
    /// At least one pod completed successfully.
    Succeeded,
    /// The job failed (pod failure or deadline exceeded).
    Failed,
}

impl JobStatus {
    /// Returns true once the job will not change state again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Parse the status of a Job from `kubectl get job -o json` output.
///
/// # Errors
///
/// Returns an error if the text is not JSON.
pub fn parse_job_status(json_text: &str) -> Result<JobStatus> {
    let value: Value = serde_json::from_str(json_text).context("Invalid job JSON")?;
    let status = &value["status"];

    if status["succeeded"].as_u64().unwrap_or(0) > 0 {
        return Ok(JobStatus::Succeeded);
    }
    if status["failed"].as_u64().unwrap_or(0) > 0 {
        return Ok(JobStatus::Failed);
    }
    let failed_condition = status["conditions"]
        .as_array()
        .into_iter()
        .flatten()
        .any(|c| c["type"] == "Failed" && c["status"] == "True");
    if failed_condition {
        return Ok(JobStatus::Failed);
    }
    Ok(JobStatus::Active)
}

/// Runs jobs on a Kubernetes cluster via kubectl.
#[derive(Debug, Clone)]
pub struct KubectlRunner {
    kubectl: String,
    namespace: String,
    context: Option<String>,
    poll_interval: Duration,
    max_retries: u32,
    keep_jobs: bool,
}

impl KubectlRunner {
    /// Create a runner from the resolved toolkit configuration.
    #[must_use]
    pub fn from_config(config: &LabConfig) -> Self {
        Self {
            kubectl: config.kubectl.clone(),
            namespace: config.namespace.clone(),
            context: config.context.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_retries: config.max_retries.max(1),
            keep_jobs: config.keep_jobs,
        }
    }

    /// Check that the kubectl binary can be found.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::MissingTool`] if it cannot.
    pub fn ensure_available(&self) -> crate::error::Result<()> {
        which::which(&self.kubectl).map_err(|_| LabError::MissingTool {
            tool: self.kubectl.clone(),
        })?;
        Ok(())
    }

    /// Namespace and context flags shared by every call.
    #[must_use]
    pub fn scope_args(&self) -> Vec<String> {
        let mut args = vec!["--namespace".to_string(), self.namespace.clone()];
        if let Some(context) = &self.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        args
    }

    /// Build the Job manifest for a spec.
    #[must_use]
    pub fn job_manifest(&self, spec: &JobSpec) -> Value {
        let env: Vec<Value> = spec
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();

        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": spec.name,
                "namespace": self.namespace,
                "labels": { MANAGED_BY_LABEL: "labramp" }
            },
            "spec": {
                "backoffLimit": 0,
                "activeDeadlineSeconds": spec.timeout.as_secs().max(1),
                "template": {
                    "metadata": { "labels": { MANAGED_BY_LABEL: "labramp" } },
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "workload",
                            "image": spec.image.clone().unwrap_or_default(),
                            "command": spec.args,
                            "env": env
                        }]
                    }
                }
            }
        })
    }

    /// Run kubectl once.
    async fn kubectl_once(&self, args: &[String], stdin: Option<&str>) -> Result<String> {
        debug!("{} {}", self.kubectl, args.join(" "));

        let mut child = Command::new(&self.kubectl)
            .args(args)
            .args(self.scope_args())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => LabError::MissingTool {
                    tool: self.kubectl.clone(),
                },
                _ => LabError::Io(e),
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            pipe.flush().await?;
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(LabError::tool(&self.kubectl, stderr.trim()).into())
        }
    }

    /// Run kubectl, retrying recoverable failures with backoff.
    async fn kubectl(&self, args: &[String], stdin: Option<&str>) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.kubectl_once(args, stdin).await {
                Ok(stdout) => return Ok(stdout),
                Err(e) if attempt < self.max_retries && is_recoverable(&e) => {
                    let delay = calculate_backoff(attempt);
                    warn!(
                        "kubectl {} failed (attempt {}/{}), retrying in {:?}: {}",
                        args.first().map(String::as_str).unwrap_or(""),
                        attempt,
                        self.max_retries,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply(&self, spec: &JobSpec) -> Result<()> {
        let manifest = serde_json::to_string(&self.job_manifest(spec))?;
        self.kubectl(&["apply".to_string(), "-f".to_string(), "-".to_string()], Some(manifest.as_str()))
            .await
            .with_context(|| format!("Failed to create job '{}'", spec.name))?;
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<JobStatus> {
        let stdout = self
            .kubectl(
                &[
                    "get".to_string(),
                    "job".to_string(),
                    name.to_string(),
                    "-o".to_string(),
                    "json".to_string(),
                ],
                None,
            )
            .await?;
        parse_job_status(&stdout)
    }

    async fn logs(&self, name: &str) -> Result<String> {
        self.kubectl(&["logs".to_string(), format!("job/{name}")], None)
            .await
    }

    async fn delete(&self, name: &str) {
        let args = [
            "delete".to_string(),
            "job".to_string(),
            name.to_string(),
            "--ignore-not-found".to_string(),
            "--wait=false".to_string(),
        ];
        if let Err(e) = self.kubectl(&args, None).await {
            warn!("Failed to delete job {}: {}", name, e);
        }
    }

    async fn wait_for(&self, spec: &JobSpec) -> Result<JobStatus> {
        let started = Instant::now();
        loop {
            let status = self.status(&spec.name).await?;
            if status.is_terminal() {
                return Ok(status);
            }
            if started.elapsed() >= spec.timeout {
                bail!(LabError::JobTimeout {
                    job: spec.name.clone(),
                    timeout_secs: spec.timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn is_recoverable(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<LabError>()
        .map_or(true, LabError::is_recoverable)
}

#[async_trait]
impl JobRunner for KubectlRunner {
    async fn run_job(&self, spec: &JobSpec) -> Result<JobOutput> {
        if spec.image.is_none() {
            bail!(LabError::job_failed(&spec.name, "kubernetes jobs need an image"));
        }

        self.apply(spec).await?;
        info!("Submitted job {} in namespace {}", spec.name, self.namespace);

        let status = match self.wait_for(spec).await {
            Ok(status) => status,
            Err(e) => {
                if !self.keep_jobs {
                    self.delete(&spec.name).await;
                }
                return Err(e);
            }
        };

        let logs = match self.logs(&spec.name).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Could not collect logs for {}: {}", spec.name, e);
                String::new()
            }
        };

        if !self.keep_jobs {
            self.delete(&spec.name).await;
        }

        Ok(JobOutput {
            succeeded: status == JobStatus::Succeeded,
            logs,
            exit_code: None,
        })
    }

    fn backend_name(&self) -> &'static str {
        "kubernetes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn runner() -> KubectlRunner {
        KubectlRunner::from_config(&LabConfig {
            namespace: "perf".to_string(),
            context: Some("lab-cluster".to_string()),
            ..LabConfig::default()
        })
    }

    #[test]
    fn test_parse_status_succeeded() {
        let json = r#"{"status":{"succeeded":1,"active":0}}"#;
        assert_eq!(parse_job_status(json).unwrap(), JobStatus::Succeeded);
    }

    #[test]
    fn test_parse_status_failed() {
        let json = r#"{"status":{"failed":1}}"#;
        assert_eq!(parse_job_status(json).unwrap(), JobStatus::Failed);
    }

    #[test]
    fn test_parse_status_deadline_condition() {
        let json = r#"{"status":{"conditions":[{"type":"Failed","status":"True","reason":"DeadlineExceeded"}]}}"#;
        assert_eq!(parse_job_status(json).unwrap(), JobStatus::Failed);
    }

    #[test]
    fn test_parse_status_active() {
        assert_eq!(
            parse_job_status(r#"{"status":{"active":1}}"#).unwrap(),
            JobStatus::Active
        );
        assert_eq!(parse_job_status("{}").unwrap(), JobStatus::Active);
    }

    #[test]
    fn test_parse_status_invalid_json() {
        assert!(parse_job_status("error: not found").is_err());
    }

    #[test]
    fn test_scope_args() {
        assert_eq!(
            runner().scope_args(),
            vec!["--namespace", "perf", "--context", "lab-cluster"]
        );
        let plain = KubectlRunner::from_config(&LabConfig::default());
        assert_eq!(plain.scope_args(), vec!["--namespace", "default"]);
    }

    #[test]
    fn test_job_manifest() {
        let mut env = BTreeMap::new();
        env.insert("TARGET".to_string(), "broker:9092".to_string());
        let spec = JobSpec::new(
            "ramp-1-abc",
            vec!["loadgen".to_string(), "--rate".to_string(), "500".to_string()],
            Duration::from_secs(120),
        )
        .with_image(Some("loadgen:1".to_string()))
        .with_env(env);

        let manifest = runner().job_manifest(&spec);
        assert_eq!(manifest["kind"], "Job");
        assert_eq!(manifest["metadata"]["name"], "ramp-1-abc");
        assert_eq!(manifest["metadata"]["namespace"], "perf");
        assert_eq!(manifest["spec"]["backoffLimit"], 0);
        assert_eq!(manifest["spec"]["activeDeadlineSeconds"], 120);

        let pod = &manifest["spec"]["template"]["spec"];
        assert_eq!(pod["restartPolicy"], "Never");
        let container = &pod["containers"][0];
        assert_eq!(container["image"], "loadgen:1");
        assert_eq!(container["command"], json!(["loadgen", "--rate", "500"]));
        assert_eq!(container["env"][0]["name"], "TARGET");
        assert_eq!(container["env"][0]["value"], "broker:9092");
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Active.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_run_job_requires_image() {
        let spec = JobSpec::new("no-image", vec!["true".to_string()], Duration::from_secs(1));
        let err = runner().run_job(&spec).await.unwrap_err();
        assert!(err.to_string().contains("need an image"));
    }

    #[test]
    fn test_missing_tool_is_not_retried() {
        let missing = anyhow::Error::from(LabError::MissingTool {
            tool: "kubectl".into(),
        });
        assert!(!is_recoverable(&missing));
        assert!(is_recoverable(&LabError::tool("kubectl", "refused").into()));
        assert!(is_recoverable(&anyhow::anyhow!("broken pipe")));
    }

    /// A stand-in `kubectl` that records its arguments and answers from
    /// files in its directory.
    #[cfg(unix)]
    struct FakeKubectl {
        dir: tempfile::TempDir,
    }

    #[cfg(unix)]
    impl FakeKubectl {
        fn new(status: &str) -> Self {
            use std::os::unix::fs::PermissionsExt;

            let dir = tempfile::tempdir().unwrap();
            let script = format!(
                r#"#!/bin/sh
dir='{}'
echo "$*" >> "$dir/calls"
case "$1" in
  apply)
    if [ -f "$dir/fail-apply" ]; then
      rm "$dir/fail-apply"
      cat > /dev/null
      echo "connection refused" >&2
      exit 1
    fi
    cat > "$dir/manifest.json"
    ;;
  get)
    if [ -f "$dir/status-first" ]; then
      cat "$dir/status-first"
      rm "$dir/status-first"
    else
      cat "$dir/status"
    fi
    ;;
  logs)
    printf 'warming up
throughput=1234.5
'
    ;;
esac
"#,
                dir.path().display()
            );
            let path = dir.path().join("kubectl");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            std::fs::write(dir.path().join("status"), status).unwrap();
            Self { dir }
        }

        fn runner(&self, keep_jobs: bool) -> KubectlRunner {
            KubectlRunner::from_config(&LabConfig {
                kubectl: self.dir.path().join("kubectl").display().to_string(),
                namespace: "perf".to_string(),
                poll_interval_secs: 0,
                max_retries: 3,
                keep_jobs,
                ..LabConfig::default()
            })
        }

        fn first_status(&self, status: &str) {
            std::fs::write(self.dir.path().join("status-first"), status).unwrap();
        }

        fn fail_next_apply(&self) {
            std::fs::write(self.dir.path().join("fail-apply"), "").unwrap();
        }

        fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir.path().join("calls"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn manifest(&self) -> Value {
            let text = std::fs::read_to_string(self.dir.path().join("manifest.json")).unwrap();
            serde_json::from_str(&text).unwrap()
        }
    }

    #[cfg(unix)]
    fn job(name: &str, timeout: Duration) -> JobSpec {
        JobSpec::new(name, vec!["loadgen".to_string()], timeout)
            .with_image(Some("loadgen:1".to_string()))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_job_polls_until_success() {
        let fake = FakeKubectl::new(r#"{"status":{"succeeded":1}}"#);
        fake.first_status(r#"{"status":{"active":1}}"#);

        let output = fake
            .runner(false)
            .run_job(&job("ramp-s1", Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(output.succeeded);
        assert!(output.logs.contains("throughput=1234.5"));
        assert_eq!(output.exit_code, None);

        assert_eq!(
            fake.calls(),
            vec![
                "apply -f - --namespace perf",
                "get job ramp-s1 -o json --namespace perf",
                "get job ramp-s1 -o json --namespace perf",
                "logs job/ramp-s1 --namespace perf",
                "delete job ramp-s1 --ignore-not-found --wait=false --namespace perf",
            ]
        );
        assert_eq!(fake.manifest()["metadata"]["name"], "ramp-s1");
        assert_eq!(
            fake.manifest()["spec"]["template"]["spec"]["containers"][0]["image"],
            "loadgen:1"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_job_reports_failed_job() {
        let fake = FakeKubectl::new(r#"{"status":{"failed":1}}"#);

        let output = fake
            .runner(false)
            .run_job(&job("ramp-s2", Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(!output.succeeded);
        assert!(output.logs.contains("warming up"));
        assert!(fake.calls().iter().any(|c| c.starts_with("delete job ramp-s2")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_job_times_out_and_cleans_up() {
        let fake = FakeKubectl::new(r#"{"status":{"active":1}}"#);

        let err = fake
            .runner(false)
            .run_job(&job("ramp-s3", Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LabError>(),
            Some(LabError::JobTimeout { job, .. }) if job == "ramp-s3"
        ));

        let calls = fake.calls();
        assert!(!calls.iter().any(|c| c.starts_with("logs")));
        assert_eq!(
            calls.last().map(String::as_str),
            Some("delete job ramp-s3 --ignore-not-found --wait=false --namespace perf")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_job_retries_transient_apply_error() {
        let fake = FakeKubectl::new(r#"{"status":{"succeeded":1}}"#);
        fake.fail_next_apply();

        let output = fake
            .runner(false)
            .run_job(&job("ramp-s4", Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(output.succeeded);

        let applies = fake.calls().iter().filter(|c| c.starts_with("apply")).count();
        assert_eq!(applies, 2);
        assert_eq!(fake.manifest()["metadata"]["name"], "ramp-s4");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_job_keeps_jobs_when_configured() {
        let fake = FakeKubectl::new(r#"{"status":{"succeeded":1}}"#);

        let output = fake
            .runner(true)
            .run_job(&job("ramp-s5", Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(output.succeeded);

        let calls = fake.calls();
        assert!(calls.iter().any(|c| c.starts_with("logs job/ramp-s5")));
        assert!(!calls.iter().any(|c| c.starts_with("delete")));
    }

    #[tokio::test]
    async fn test_missing_kubectl_binary() {
        let runner = KubectlRunner::from_config(&LabConfig {
            kubectl: "/nonexistent/labramp-kubectl".to_string(),
            ..LabConfig::default()
        });
        let spec = JobSpec::new("ramp-s6", vec!["loadgen".to_string()], Duration::from_secs(1))
            .with_image(Some("loadgen:1".to_string()));

        let err = runner.run_job(&spec).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LabError>(),
            Some(LabError::MissingTool { .. })
        ));
    }
}
