//! Throughput extraction from workload output.
//!
//! The workload reports its achieved rate on a line such as
//! `throughput=1234.5` or `throughput: 1234.5`. Spaces and tabs may follow
//! the separator; the number is digits with at most one decimal part, so
//! `12.5.3` reads as `12.5` on both the native and the shell side. When
//! several lines match, the last one wins, so progress lines printed during
//! the stage do not shadow the final figure.

use regex::Regex;

use crate::error::{LabError, Result};

/// Builds the pattern matching `<key>=<n>` or `<key>: <n>`.
///
/// Mirrors the `sed` expression used inside batch jobs
/// (see [`sed_extract_expression`]).
///
/// # Errors
///
/// Returns an error if the key produces an invalid regex.
pub fn throughput_pattern(key: &str) -> Result<Regex> {
    Regex::new(&format!(
        r"{}[=:][[:blank:]]*([0-9]+(?:\.[0-9]+)?)",
        regex::escape(key)
    ))
    .map_err(|e| LabError::invalid_plan("workload.throughput_key", e.to_string()))
}

/// Returns the last throughput value reported in `logs`.
#[must_use]
pub fn extract_throughput(pattern: &Regex, logs: &str) -> Option<f64> {
    pattern
        .captures_iter(logs)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .last()
}

/// The `sed` program extracting the same value in a shell.
///
/// The key is restricted to `[A-Za-z0-9_]` by plan validation, so it needs
/// no escaping.
#[must_use]
pub fn sed_extract_expression(key: &str) -> String {
    format!(
        r"s/.*{}[=:][[:blank:]]*\([0-9][0-9]*\(\.[0-9][0-9]*\)\{{0,1\}}\).*/\1/p",
        key
    )
}
