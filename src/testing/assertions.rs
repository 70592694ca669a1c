//! Custom assertions for domain-specific testing.
//!
//! Provides expressive assertions for run outcomes.

use crate::runner::{RunOutcome, StopReason};

/// Assert that a run stopped early on a plateau after `stage`.
///
/// # Panics
///
/// Panics with a descriptive message if the run stopped for another reason.
///
/// # Example
///
/// ```rust,ignore
/// let outcome = runner.run().await?;
/// assert_stopped_on_plateau(&outcome, 3);
/// ```
pub fn assert_stopped_on_plateau(outcome: &RunOutcome, stage: usize) {
    match &outcome.stop_reason {
        StopReason::Plateau { stage: actual, .. } => assert_eq!(
            *actual, stage,
            "Expected plateau at stage {}, but it was detected at stage {}",
            stage, actual
        ),
        other => panic!("Expected plateau at stage {}, got {:?}", stage, other),
    }
}

/// Assert that every stage ran and the run completed.
///
/// # Panics
///
/// Panics if the run stopped early or fewer than `stages` results exist.
pub fn assert_completed(outcome: &RunOutcome, stages: usize) {
    assert_eq!(
        outcome.stop_reason,
        StopReason::Completed,
        "Expected a completed run, got {:?}",
        outcome.stop_reason
    );
    assert_eq!(
        outcome.stages.len(),
        stages,
        "Expected {} stage results, got {}",
        stages,
        outcome.stages.len()
    );
}

/// Assert that the run failed at `stage`.
///
/// # Panics
///
/// Panics if the run did not fail at that stage.
pub fn assert_failed_at(outcome: &RunOutcome, stage: usize) {
    match &outcome.stop_reason {
        StopReason::StageFailed { stage: actual, .. } => assert_eq!(
            *actual, stage,
            "Expected failure at stage {}, got stage {}",
            stage, actual
        ),
        other => panic!("Expected failure at stage {}, got {:?}", stage, other),
    }
}
