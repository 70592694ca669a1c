//! Plateau detection for ramped load tests.
//!
//! This module decides whether a ramp has stopped paying off: once the most
//! recent stages fail to beat the throughput recorded just before them by a
//! configured percentage, further stages are not worth running.
//!
//! The decision exists in two forms generated from the same policy value:
//! the native [`is_plateaued`] function, and a shell function emitted by
//! [`script::render_plateau_function`] for batch jobs that run every stage
//! inside one remote container.

pub mod script;
pub mod tracker;
pub mod types;

pub use script::{render_plateau_function, PLATEAU_FUNCTION_NAME};
pub use tracker::{improvement_percent, is_plateaued, PlateauDecision, PlateauTracker};
pub use types::{PlateauPolicy, ThroughputHistory};
