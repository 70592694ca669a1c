//! Plateau decision and the per-run tracker that feeds it.

use serde::{Deserialize, Serialize};

use super::types::{PlateauPolicy, ThroughputHistory};

/// Returns the improvement of `recent` over `baseline`, in percent.
///
/// A zero or negative baseline yields `0.0`.
#[must_use]
pub fn improvement_percent(baseline: f64, recent: f64) -> f64 {
    if baseline > 0.0 {
        ((recent - baseline) / baseline) * 100.0
    } else {
        0.0
    }
}

/// Decides whether the most recent stages show no meaningful improvement.
///
/// The baseline is the value recorded immediately before the window of the
/// `consecutive_steps_required` most recent values. Every value in the window
/// is compared against that single baseline; the history is a plateau only if
/// none of them improves on it by strictly more than
/// `min_improvement_percent`. Histories shorter than
/// `consecutive_steps_required + 1` are never a plateau.
///
/// # Example
///
/// ```
/// use labramp::plateau::{is_plateaued, PlateauPolicy};
///
/// let policy = PlateauPolicy::new(10.0, 2).unwrap();
/// assert!(is_plateaued(&[100.0, 102.0, 103.0], &policy));
/// assert!(!is_plateaued(&[100.0, 102.0, 120.0], &policy));
/// ```
#[must_use]
pub fn is_plateaued(history: &[f64], policy: &PlateauPolicy) -> bool {
    let steps = policy.consecutive_steps_required();
    if history.len() < policy.min_history_len() {
        return false;
    }

    let baseline_index = history.len() - steps - 1;
    let baseline = history[baseline_index];

    !history[baseline_index + 1..].iter().any(|&recent| {
        improvement_percent(baseline, recent) > policy.min_improvement_percent()
    })
}

/// Outcome of evaluating the history after a stage completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlateauDecision {
    /// Keep ramping.
    Continue,
    /// Throughput stopped improving.
    Plateau {
        /// Value recorded just before the examined window.
        baseline: f64,
        /// The recent values that failed to clear the threshold.
        window: Vec<f64>,
    },
}

impl PlateauDecision {
    /// Returns true if this decision stops the ramp.
    #[must_use]
    pub fn is_plateau(&self) -> bool {
        matches!(self, Self::Plateau { .. })
    }
}

/// Tracks throughput across a run and reports plateau decisions.
///
/// # Example
///
/// ```
/// use labramp::plateau::{PlateauPolicy, PlateauTracker};
///
/// let mut tracker = PlateauTracker::new(PlateauPolicy::new(10.0, 2).unwrap());
/// assert!(!tracker.record(100.0).is_plateau());
/// assert!(!tracker.record(102.0).is_plateau());
/// assert!(tracker.record(103.0).is_plateau());
/// ```
#[derive(Debug, Clone)]
pub struct PlateauTracker {
    policy: PlateauPolicy,
    history: ThroughputHistory,
}

impl PlateauTracker {
    /// Creates a tracker with an empty history.
    #[must_use]
    pub fn new(policy: PlateauPolicy) -> Self {
        Self {
            policy,
            history: ThroughputHistory::new(),
        }
    }

    /// Returns the policy in use.
    #[must_use]
    pub fn policy(&self) -> &PlateauPolicy {
        &self.policy
    }

    /// Returns the history recorded so far.
    #[must_use]
    pub fn history(&self) -> &ThroughputHistory {
        &self.history
    }

    /// Consumes the tracker, returning its history.
    #[must_use]
    pub fn into_history(self) -> ThroughputHistory {
        self.history
    }

    /// Records a completed stage and evaluates the updated history.
    pub fn record(&mut self, throughput: f64) -> PlateauDecision {
        self.history.push(throughput);
        self.decision()
    }

    /// Evaluates the current history without recording anything.
    #[must_use]
    pub fn is_plateaued(&self) -> bool {
        is_plateaued(self.history.values(), &self.policy)
    }

    /// Evaluates the current history, including the values behind the decision.
    #[must_use]
    pub fn decision(&self) -> PlateauDecision {
        if !self.is_plateaued() {
            return PlateauDecision::Continue;
        }
        let values = self.history.values();
        let baseline_index = values.len() - self.policy.consecutive_steps_required() - 1;
        PlateauDecision::Plateau {
            baseline: values[baseline_index],
            window: values[baseline_index + 1..].to_vec(),
        }
    }
}
