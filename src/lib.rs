//! labramp - ramped load testing with plateau detection
//!
//! Runs a load-generating workload at increasing target rates, one stage at
//! a time, and stops the ramp once measured throughput stops improving.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`plateau`] - The plateau decision, its tracker and its shell rendition
//! - [`plan`] - Test plan documents and stage expansion
//! - [`runner`] - The execution state machine (sequential and batch modes)
//! - [`executor`] - Job backends (Kubernetes via kubectl, local processes)
//! - [`report`] - Results directories and export formats
//! - [`config`] - Layered tool configuration
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Testing infrastructure (traits, mocks, fixtures)
//!
//! # Example
//!
//! ```rust,ignore
//! use labramp::executor::LocalRunner;
//! use labramp::plan::TestPlan;
//! use labramp::runner::{PlanRunner, RunOptions};
//!
//! let plan = TestPlan::from_file("plan.toml".as_ref())?;
//! let backend = LocalRunner::new();
//! let outcome = PlanRunner::new(&plan, &backend, RunOptions::default())
//!     .run()
//!     .await?;
//! println!("{}", outcome.stop_reason);
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod plan;
pub mod plateau;
pub mod report;
pub mod runner;
pub mod testing;

// Re-export commonly used types
pub use error::{IntoLabError, LabError, Result};

pub use config::{ConfigLoader, LabConfig};
pub use plan::{Backend, ExecutionMode, ModeSetting, StageSpec, TestPlan};
pub use plateau::{is_plateaued, PlateauDecision, PlateauPolicy, PlateauTracker, ThroughputHistory};
pub use report::{ExportFormat, ReportWriter};
pub use runner::{PlanRunner, RunOptions, RunOutcome, RunState, StageResult, StopReason};
pub use testing::{JobOutput, JobRunner, JobSpec, MockJobRunner};
