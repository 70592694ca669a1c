//! Custom error types for labramp.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and exit-code selection throughout the toolkit.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for labramp operations
#[derive(Error, Debug)]
pub enum LabError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Invalid test plan document
    #[error("Invalid test plan: {field} - {reason}")]
    InvalidPlan { field: String, reason: String },

    /// Invalid plateau policy
    #[error("Invalid plateau policy: {reason}")]
    InvalidPolicy { reason: String },

    /// Missing required file
    #[error("Missing required file: {path}")]
    MissingFile { path: PathBuf },

    // =========================================================================
    // Tool Errors
    // =========================================================================
    /// Missing required tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

    /// Tool execution failed
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    // =========================================================================
    // Job Errors
    // =========================================================================
    /// Job finished unsuccessfully
    #[error("Job '{job}' failed: {message}")]
    JobFailed { job: String, message: String },

    /// Job did not finish in time
    #[error("Job '{job}' did not finish within {timeout_secs}s")]
    JobTimeout { job: String, timeout_secs: u64 },

    /// Job output carried no throughput figure
    #[error("No '{key}' value found in output of stage {stage}")]
    ThroughputNotFound { stage: usize, key: String },

    // =========================================================================
    // Report Errors
    // =========================================================================
    /// Report generation failed
    #[error("Report error: {message}")]
    Report { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML parse error wrapper
    #[error(transparent)]
    TomlParse(#[from] toml::de::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LabError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid plan error
    pub fn invalid_plan(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPlan {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid policy error
    pub fn invalid_policy(reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            reason: reason.into(),
        }
    }

    /// Create a tool execution error
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a job failure error
    pub fn job_failed(job: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JobFailed {
            job: job.into(),
            message: message.into(),
        }
    }

    /// Create a report error
    pub fn report(message: impl Into<String>) -> Self {
        Self::Report {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ToolExecution { .. } | Self::Io(_))
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::JobFailed { .. } | Self::ThroughputNotFound { .. } => 3,
            Self::JobTimeout { .. } => 4,
            Self::InvalidPlan { .. } | Self::InvalidPolicy { .. } => 5,
            Self::MissingFile { .. } | Self::MissingTool { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::TomlParse(_) => 7,
            _ => 1,
        }
    }
}

/// Type alias for labramp results
pub type Result<T> = std::result::Result<T, LabError>;

/// Extension trait for converting foreign errors to LabError
pub trait IntoLabError<T> {
    fn into_lab_report(self) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoLabError<T> for std::result::Result<T, E> {
    fn into_lab_report(self) -> Result<T> {
        self.map_err(|e| LabError::report(e.into().to_string()))
    }
}
