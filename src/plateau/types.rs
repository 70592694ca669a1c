//! Core types for plateau detection.

use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};

/// Default minimum improvement (percent) that still counts as progress.
pub const DEFAULT_MIN_IMPROVEMENT_PERCENT: f64 = 10.0;

/// Default number of flat stages required before declaring a plateau.
pub const DEFAULT_CONSECUTIVE_STEPS: usize = 2;

/// Policy deciding when a throughput history counts as plateaued.
///
/// Built once from a test plan and never mutated. Construct through
/// [`PlateauPolicy::new`] to get validation; deserialized values are
/// checked by [`PlateauPolicy::validate`] when the plan is loaded.
///
/// # Example
///
/// ```
/// use labramp::plateau::PlateauPolicy;
///
/// let policy = PlateauPolicy::new(5.0, 3).unwrap();
/// assert_eq!(policy.consecutive_steps_required(), 3);
/// assert!(PlateauPolicy::new(5.0, 0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauPolicy {
    /// Minimum relative gain over the baseline that counts as improving.
    #[serde(default = "default_min_improvement")]
    min_improvement_percent: f64,
    /// How many recent stages must all fail to clear the bar.
    #[serde(default = "default_consecutive_steps")]
    consecutive_steps_required: usize,
}

fn default_min_improvement() -> f64 {
    DEFAULT_MIN_IMPROVEMENT_PERCENT
}

fn default_consecutive_steps() -> usize {
    DEFAULT_CONSECUTIVE_STEPS
}

impl Default for PlateauPolicy {
    fn default() -> Self {
        Self {
            min_improvement_percent: DEFAULT_MIN_IMPROVEMENT_PERCENT,
            consecutive_steps_required: DEFAULT_CONSECUTIVE_STEPS,
        }
    }
}

impl PlateauPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InvalidPolicy`] when `consecutive_steps_required`
    /// is zero or `min_improvement_percent` is not finite.
    pub fn new(min_improvement_percent: f64, consecutive_steps_required: usize) -> Result<Self> {
        let policy = Self {
            min_improvement_percent,
            consecutive_steps_required,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Returns the minimum improvement percentage.
    #[must_use]
    pub fn min_improvement_percent(&self) -> f64 {
        self.min_improvement_percent
    }

    /// Returns the number of consecutive flat steps required.
    #[must_use]
    pub fn consecutive_steps_required(&self) -> usize {
        self.consecutive_steps_required
    }

    /// Smallest history length for which a plateau can be reported.
    #[must_use]
    pub fn min_history_len(&self) -> usize {
        self.consecutive_steps_required.saturating_add(1)
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InvalidPolicy`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.consecutive_steps_required == 0 {
            return Err(LabError::invalid_policy(
                "consecutive_steps_required must be at least 1",
            ));
        }
        if !self.min_improvement_percent.is_finite() {
            return Err(LabError::invalid_policy(format!(
                "min_improvement_percent must be finite, got {}",
                self.min_improvement_percent
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for PlateauPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<= {}% improvement over {} consecutive stages",
            self.min_improvement_percent, self.consecutive_steps_required
        )
    }
}

/// Append-only throughput history, one value per completed stage.
///
/// # Example
///
/// ```
/// use labramp::plateau::ThroughputHistory;
///
/// let mut history = ThroughputHistory::new();
/// history.push(1200.0);
/// history.push(1350.5);
/// assert_eq!(history.len(), 2);
/// assert_eq!(history.last(), Some(1350.5));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThroughputHistory {
    values: Vec<f64>,
}

impl ThroughputHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a history from already-recorded values, oldest first.
    #[must_use]
    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Appends the throughput of a newly completed stage.
    pub fn push(&mut self, throughput: f64) {
        self.values.push(throughput);
    }

    /// Returns the recorded values, oldest first.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns the number of recorded stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no stage has completed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the most recent value.
    #[must_use]
    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }
}
