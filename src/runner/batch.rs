//! Batch jobs: every stage of a plan inside one remote job.
//!
//! The generated script runs the stages in order, prints a marker line per
//! stage and evaluates the plateau check in the shell after each one, so the
//! ramp can stop without a round trip to the controller. The controller
//! rebuilds the stage results from the markers afterwards.
//!
//! Marker lines:
//!
//! ```text
//! LABRAMP_STAGE index=<n> rate=<r> throughput=<t>
//! LABRAMP_STAGE_FAILED index=<n> reason=<word>
//! LABRAMP_PLATEAU index=<n>
//! LABRAMP_DONE
//! ```

use tracing::warn;

use crate::plan::{StageSpec, TestPlan, DURATION_PLACEHOLDER, RATE_PLACEHOLDER, STAGE_PLACEHOLDER};
use crate::plateau::{render_plateau_function, PlateauPolicy, PLATEAU_FUNCTION_NAME};

use super::throughput::sed_extract_expression;

const STAGE_MARKER: &str = "LABRAMP_STAGE";
const FAILED_MARKER: &str = "LABRAMP_STAGE_FAILED";
const PLATEAU_MARKER: &str = "LABRAMP_PLATEAU";
const DONE_MARKER: &str = "LABRAMP_DONE";

/// Quote a string for POSIX `sh`.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Render one command template argument, mapping placeholders to the
/// stage function's shell variables.
#[must_use]
pub fn render_template_arg(arg: &str) -> String {
    let placeholders = [
        (RATE_PLACEHOLDER, "\"$rate\""),
        (DURATION_PLACEHOLDER, "\"$duration\""),
        (STAGE_PLACEHOLDER, "\"$stage\""),
    ];

    let mut rendered = String::new();
    let mut rest = arg;
    loop {
        let next = placeholders
            .iter()
            .filter_map(|(token, var)| rest.find(token).map(|pos| (pos, *token, *var)))
            .min_by_key(|(pos, _, _)| *pos);

        match next {
            Some((pos, token, var)) => {
                if pos > 0 {
                    rendered.push_str(&shell_quote(&rest[..pos]));
                }
                rendered.push_str(var);
                rest = &rest[pos + token.len()..];
            }
            None => {
                if !rest.is_empty() || rendered.is_empty() {
                    rendered.push_str(&shell_quote(rest));
                }
                return rendered;
            }
        }
    }
}

/// Render the script executed by a batch job.
///
/// The plateau check is skipped after the final stage, matching sequential
/// execution: a plateau only matters when there are stages left to skip.
#[must_use]
pub fn render_batch_script(
    plan: &TestPlan,
    stages: &[StageSpec],
    policy: Option<&PlateauPolicy>,
) -> String {
    let command: Vec<String> = plan
        .workload
        .command
        .iter()
        .map(|arg| render_template_arg(arg))
        .collect();

    let mut script = String::new();
    script.push_str("#!/bin/sh\n");
    script.push_str(&format!(
        "# labramp batch job for plan {} ({} stages)\n",
        shell_quote(plan.name()).replace('\n', " "),
        stages.len()
    ));
    script.push_str("set -u\n\nHISTORY=\"\"\n\n");

    if let Some(policy) = policy {
        script.push_str(&render_plateau_function(policy));
        script.push('\n');
    }

    script.push_str(&format!(
        r#"labramp_stage() {{
  stage="$1"
  rate="$2"
  duration="$3"
  if ! out=$({command} 2>&1); then
    printf '%s\n' "$out"
    echo "{FAILED_MARKER} index=$stage reason=exit"
    return 1
  fi
  printf '%s\n' "$out"
  tp=$(printf '%s\n' "$out" | sed -n '{sed}' | tail -n 1)
  if [ -z "$tp" ]; then
    echo "{FAILED_MARKER} index=$stage reason=no-throughput"
    return 1
  fi
  echo "{STAGE_MARKER} index=$stage rate=$rate throughput=$tp"
  HISTORY="$HISTORY $tp"
}}

"#,
        command = command.join(" "),
        sed = sed_extract_expression(&plan.workload.throughput_key),
    ));

    for (position, stage) in stages.iter().enumerate() {
        script.push_str(&format!(
            "labramp_stage {} {} {} || exit 1\n",
            stage.index, stage.target_rate, stage.duration_secs
        ));
        let is_last = position + 1 == stages.len();
        if policy.is_some() && !is_last {
            script.push_str(&format!(
                "if [ \"$({PLATEAU_FUNCTION_NAME} $HISTORY)\" = \"yes\" ]; then echo \"{PLATEAU_MARKER} index={}\"; exit 0; fi\n",
                stage.index
            ));
        }
    }
    script.push_str(&format!("echo \"{DONE_MARKER}\"\n"));
    script
}

/// A stage measurement reported by a batch job.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStage {
    pub index: usize,
    pub rate: f64,
    pub throughput: f64,
}

/// Everything parsed from a batch job's logs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchLog {
    pub stages: Vec<BatchStage>,
    pub failed: Option<(usize, String)>,
    pub plateau_at: Option<usize>,
    pub done: bool,
}

/// Parse `key=value` fields following a marker.
fn fields(rest: &str) -> impl Iterator<Item = (&str, &str)> {
    rest.split_whitespace().filter_map(|f| f.split_once('='))
}

fn field<'a>(rest: &'a str, name: &str) -> Option<&'a str> {
    fields(rest).find(|(k, _)| *k == name).map(|(_, v)| v)
}

/// Extract marker lines from batch logs; other lines are ignored.
#[must_use]
pub fn parse_batch_log(logs: &str) -> BatchLog {
    let mut log = BatchLog::default();

    for line in logs.lines().map(str::trim) {
        let (marker, rest) = line.split_once(' ').unwrap_or((line, ""));
        match marker {
            STAGE_MARKER => {
                let index = field(rest, "index").and_then(|v| v.parse().ok());
                let rate = field(rest, "rate").and_then(|v| v.parse().ok());
                let throughput = field(rest, "throughput").and_then(|v| v.parse().ok());
                match (index, rate, throughput) {
                    (Some(index), Some(rate), Some(throughput)) => log.stages.push(BatchStage {
                        index,
                        rate,
                        throughput,
                    }),
                    _ => warn!("Ignoring malformed batch marker: {}", line),
                }
            }
            FAILED_MARKER => {
                if let Some(index) = field(rest, "index").and_then(|v| v.parse().ok()) {
                    let reason = field(rest, "reason").unwrap_or("unknown").to_string();
                    log.failed = Some((index, reason));
                }
            }
            PLATEAU_MARKER => {
                log.plateau_at = field(rest, "index").and_then(|v| v.parse().ok());
            }
            DONE_MARKER => log.done = true,
            _ => {}
        }
    }
    log
}
