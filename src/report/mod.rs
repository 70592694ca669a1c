//! Results directory for finished runs.
//!
//! Each run gets its own directory `<results_dir>/<plan>-<run_id>/`
//! holding:
//!
//! - `outcome.json`: the full [`RunOutcome`], including the throughput
//!   history
//! - `stages.csv`: one row per completed stage
//! - `summary.md`: a readable summary
//!
//! # Example
//!
//! ```rust,ignore
//! let dir = ReportWriter::new("results").write(&outcome)?;
//! println!("Report written to {}", dir.display());
//! ```

pub mod export;

pub use export::{export, load_outcome, ExportFormat};

use std::path::PathBuf;
use tracing::debug;

use crate::error::{IntoLabError, Result};
use crate::plan::slugify;
use crate::runner::RunOutcome;

/// File name of the machine-readable outcome.
pub const OUTCOME_FILE: &str = "outcome.json";
/// File name of the per-stage CSV.
pub const STAGES_FILE: &str = "stages.csv";
/// File name of the markdown summary.
pub const SUMMARY_FILE: &str = "summary.md";

/// Writes run outcomes below a results directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    results_dir: PathBuf,
}

impl ReportWriter {
    /// Create a writer rooted at `results_dir`; nothing is created yet.
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    /// Directory a given outcome is written to.
    #[must_use]
    pub fn run_dir(&self, outcome: &RunOutcome) -> PathBuf {
        let slug = slugify(&outcome.plan_name);
        self.results_dir
            .join(format!("{}-{}", slug, outcome.run_id))
    }

    /// Write all report files and return the run directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or any file cannot be written.
    pub fn write(&self, outcome: &RunOutcome) -> Result<PathBuf> {
        let dir = self.run_dir(outcome);
        std::fs::create_dir_all(&dir)?;

        for (file, format) in [
            (OUTCOME_FILE, ExportFormat::Json),
            (STAGES_FILE, ExportFormat::Csv),
            (SUMMARY_FILE, ExportFormat::Markdown),
        ] {
            let content = export(outcome, format).into_lab_report()?;
            std::fs::write(dir.join(file), content)?;
        }

        debug!("Wrote report for run {} to {}", outcome.run_id, dir.display());
        Ok(dir)
    }
}
