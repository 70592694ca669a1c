//! Run state types and outcomes.
//!
//! This module defines how a test-plan run ends and the
//! outcome record handed to reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::ExecutionMode;
use crate::plateau::ThroughputHistory;

/// Where a run ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Every stage ran.
    Completed,
    /// Stopped early after `stage` because throughput stopped improving.
    Plateaued { stage: usize },
    /// `stage` could not produce a measurement.
    Failed { stage: usize },
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Plateaued { stage } => write!(f, "plateaued after stage {}", stage),
            Self::Failed { stage } => write!(f, "failed at stage {}", stage),
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// All stages ran.
    Completed,
    /// Throughput plateaued after `stage`.
    Plateau { stage: usize, baseline: f64 },
    /// `stage` failed.
    StageFailed { stage: usize, message: String },
}

impl StopReason {
    /// The terminal state matching this reason.
    #[must_use]
    pub fn final_state(&self) -> RunState {
        match self {
            Self::Completed => RunState::Completed,
            Self::Plateau { stage, .. } => RunState::Plateaued { stage: *stage },
            Self::StageFailed { stage, .. } => RunState::Failed { stage: *stage },
        }
    }

    /// Returns true if the run failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::StageFailed { .. })
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "all stages completed"),
            Self::Plateau { stage, baseline } => write!(
                f,
                "throughput plateaued after stage {} (baseline {:.2})",
                stage, baseline
            ),
            Self::StageFailed { stage, message } => {
                write!(f, "stage {} failed: {}", stage, message)
            }
        }
    }
}

/// Measurement of one completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// 1-based stage index.
    pub index: usize,
    pub target_rate: f64,
    pub throughput: f64,
    /// Change against the previous stage, in percent; `None` for the first
    /// stage or after a non-positive value.
    pub improvement_percent: Option<f64>,
    pub duration_secs: u64,
}

/// Everything known about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub plan_name: String,
    pub mode: ExecutionMode,
    pub backend: String,
    pub planned_stages: usize,
    pub stages: Vec<StageResult>,
    pub history: ThroughputHistory,
    pub stop_reason: StopReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// The state the run ended in.
    #[must_use]
    pub fn final_state(&self) -> RunState {
        self.stop_reason.final_state()
    }

    /// Best stage by throughput.
    #[must_use]
    pub fn peak_stage(&self) -> Option<&StageResult> {
        self.stages
            .iter()
            .max_by(|a, b| a.throughput.total_cmp(&b.throughput))
    }

    /// Stages skipped thanks to an early stop or failure.
    #[must_use]
    pub fn skipped_stages(&self) -> usize {
        self.planned_stages.saturating_sub(self.stages.len())
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(index: usize, throughput: f64) -> StageResult {
        StageResult {
            index,
            target_rate: index as f64 * 100.0,
            throughput,
            improvement_percent: None,
            duration_secs: 10,
        }
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Failed { stage: 2 }.to_string(), "failed at stage 2");
        assert_eq!(
            RunState::Plateaued { stage: 4 }.to_string(),
            "plateaued after stage 4"
        );
    }

    #[test]
    fn test_stop_reason_final_state() {
        assert_eq!(StopReason::Completed.final_state(), RunState::Completed);
        assert_eq!(
            StopReason::Plateau {
                stage: 3,
                baseline: 1.0
            }
            .final_state(),
            RunState::Plateaued { stage: 3 }
        );
        assert!(StopReason::StageFailed {
            stage: 1,
            message: "x".into()
        }
        .is_failure());
    }

    #[test]
    fn test_stop_reason_serialization() {
        let reason = StopReason::Plateau {
            stage: 3,
            baseline: 1200.0,
        };
        let json = serde_json::to_string(&reason).unwrap();
        assert_eq!(json, r#"{"reason":"plateau","stage":3,"baseline":1200.0}"#);
    }

    #[test]
    fn test_outcome_helpers() {
        let now = Utc::now();
        let outcome = RunOutcome {
            run_id: "r1".into(),
            plan_name: "p".into(),
            mode: ExecutionMode::Sequential,
            backend: "mock".into(),
            planned_stages: 5,
            stages: vec![stage(1, 10.0), stage(2, 30.0), stage(3, 20.0)],
            history: ThroughputHistory::from_values(vec![10.0, 30.0, 20.0]),
            stop_reason: StopReason::Plateau {
                stage: 3,
                baseline: 10.0,
            },
            started_at: now,
            finished_at: now + chrono::Duration::seconds(90),
        };
        assert_eq!(outcome.peak_stage().map(|s| s.index), Some(2));
        assert_eq!(outcome.skipped_stages(), 2);
        assert_eq!(outcome.elapsed().num_seconds(), 90);
        assert_eq!(outcome.final_state(), RunState::Plateaued { stage: 3 });
    }
}
