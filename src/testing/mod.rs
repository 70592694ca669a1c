//! Testing infrastructure for labramp.
//!
//! This module provides traits, mocks, fixtures, and assertions for testing
//! the execution state machine without a cluster or real processes.
//!
//! # Architecture
//!
//! - **Traits**: The job backend abstraction ([`JobRunner`])
//! - **Mocks**: A scripted backend ([`MockJobRunner`])
//! - **Fixtures**: Ready-made plans (test-only)
//! - **Assertions**: Checks on run outcomes
//!
//! # Example
//!
//! ```rust,ignore
//! use labramp::testing::{MockJobRunner, assert_stopped_on_plateau};
//!
//! let runner = MockJobRunner::with_throughputs(&[100.0, 102.0, 103.0]);
//! ```

pub mod assertions;
#[cfg(test)]
pub mod fixtures;
pub mod mocks;
pub mod traits;

// Re-export commonly used types
pub use assertions::*;
#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;
pub use traits::*;
