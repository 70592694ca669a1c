//! Export formats for run outcomes.
//!
//! Values are rounded to two decimals here and only here; the outcome
//! itself keeps full precision.

use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;

use crate::error::{IntoLabError, LabError};
use crate::runner::{RunOutcome, StopReason};

/// Export format for a run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty-printed JSON of the whole outcome.
    Json,
    /// One row per completed stage.
    Csv,
    /// Human-readable summary with a stage table.
    Markdown,
}

impl ExportFormat {
    /// Get the file extension for this format.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Markdown => "md",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            _ => Err(anyhow::anyhow!(
                "Invalid export format: {}. Valid formats: json, csv, markdown",
                s
            )),
        }
    }
}

/// Render an outcome in the given format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn export(outcome: &RunOutcome, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(outcome).context("Failed to serialize outcome to JSON")
        }
        ExportFormat::Csv => Ok(export_csv(outcome)),
        ExportFormat::Markdown => Ok(export_markdown(outcome)),
    }
}

/// Read an `outcome.json` written by a previous run.
///
/// # Errors
///
/// Returns [`LabError::MissingFile`] if the file does not exist, or a report
/// error if it is not a valid outcome.
pub fn load_outcome(path: &Path) -> crate::error::Result<RunOutcome> {
    if !path.exists() {
        return Err(LabError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a labramp outcome", path.display()))
        .into_lab_report()
}

fn export_csv(outcome: &RunOutcome) -> String {
    let mut csv = String::from("stage,target_rate,throughput,improvement_percent\n");
    for stage in &outcome.stages {
        let improvement = stage
            .improvement_percent
            .map(|p| format!("{:.2}", p))
            .unwrap_or_default();
        csv.push_str(&format!(
            "{},{},{:.2},{}\n",
            stage.index, stage.target_rate, stage.throughput, improvement
        ));
    }
    csv
}

fn export_markdown(outcome: &RunOutcome) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Load test: {}\n\n", escape_markdown(&outcome.plan_name)));
    md.push_str(&format!("- **Run:** `{}`\n", outcome.run_id));
    md.push_str(&format!(
        "- **Mode:** {} on {}\n",
        outcome.mode, outcome.backend
    ));
    md.push_str(&format!(
        "- **Started:** {}\n",
        outcome.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    md.push_str(&format!(
        "- **Elapsed:** {}s\n",
        outcome.elapsed().num_seconds()
    ));
    md.push_str(&format!(
        "- **Stages:** {} of {} run\n",
        outcome.stages.len(),
        outcome.planned_stages
    ));
    md.push_str(&format!("- **Result:** {}\n", outcome.stop_reason));
    if let Some(peak) = outcome.peak_stage() {
        md.push_str(&format!(
            "- **Peak:** {:.2} at stage {} (target {})\n",
            peak.throughput, peak.index, peak.target_rate
        ));
    }

    md.push_str("\n| Stage | Target rate | Throughput | Change |\n");
    md.push_str("|------:|------------:|-----------:|-------:|\n");
    for stage in &outcome.stages {
        let change = stage
            .improvement_percent
            .map(|p| format!("{:+.2}%", p))
            .unwrap_or_else(|| "-".to_string());
        md.push_str(&format!(
            "| {} | {} | {:.2} | {} |\n",
            stage.index, stage.target_rate, stage.throughput, change
        ));
    }

    match &outcome.stop_reason {
        StopReason::Plateau { stage, .. } if outcome.skipped_stages() > 0 => {
            md.push_str(&format!(
                "\nStopped after stage {}; {} remaining stage(s) skipped.\n",
                stage,
                outcome.skipped_stages()
            ));
        }
        StopReason::StageFailed { message, .. } => {
            md.push_str(&format!("\n**Failure:** {}\n", escape_markdown(message)));
        }
        _ => {}
    }
    md
}

fn escape_markdown(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}
