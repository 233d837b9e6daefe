//! Error types for `LineAudit`.
//!
//! A domain taxonomy (`EngineError`) shared by every engine component,
//! configuration errors, and a top-level aggregate with Unix exit-code
//! mapping for the CLI.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::PhoneStatus;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `LineAudit` CLI operations, following Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Engine error (rejected transition, token failure, storage outage)
    pub const ENGINE_ERROR: i32 = 4;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Domain Errors
// ============================================================================

/// Domain error taxonomy shared by the lifecycle state machine, campaign
/// workflow, confirmation processing, and persistence layer.
///
/// Per-recipient email failures are deliberately absent: they are recorded
/// as [`crate::model::DispatchFailure`] entries and never propagated.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Malformed or missing input, illegal creation state, or a bad
    /// phone-number format.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A status change not permitted by the lifecycle transition table.
    /// Carries both sides so callers can render a precise message.
    #[error("transition rejected: {from} -> {to}")]
    TransitionRejected { from: PhoneStatus, to: PhoneStatus },

    /// The verification token's wall-clock deadline has passed.
    #[error("verification token expired at {expired_at}")]
    TokenExpired { expired_at: DateTime<Utc> },

    /// A terminal submission was already accepted for this token.
    #[error("verification token already consumed")]
    TokenAlreadyConsumed,

    /// Unknown token, campaign, phone, or employee.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Concurrent write collision; the caller should retry.
    #[error("persistence conflict: {0}")]
    Conflict(String),

    /// Storage-layer outage. During dispatch this surfaces as campaign
    /// status `failed` with a root-cause error summary entry.
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Convenience constructor for [`EngineError::Validation`].
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Convenience constructor for [`EngineError::NotFound`].
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Machine-readable code used in API error bodies.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::TransitionRejected { .. } => "transition_rejected",
            Self::TokenExpired { .. } => "token_expired",
            Self::TokenAlreadyConsumed => "token_already_consumed",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "persistence_conflict",
            Self::Storage(_) => "storage_error",
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed.
    #[error("cannot read {path}: {message}")]
    ReadError {
        /// Path to the configuration file
        path: PathBuf,
        /// Underlying I/O error message
        message: String,
    },

    /// YAML parsing failed.
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Error message from the parser
        message: String,
    },

    /// File exceeds the configured size limit.
    #[error("{path} is too large: {size} bytes (limit: {limit})")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    /// Configuration validation failed.
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },
}

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g. `"dispatch.workers"`)
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Validation failure that prevents the configuration from being used
    Error,
    /// Potential issue that does not prevent loading
    Warning,
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type aggregating all domain-specific errors and
/// providing exit-code mapping for the CLI.
#[derive(Debug, Error)]
pub enum LineAuditError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Engine error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl LineAuditError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Engine(_) => ExitCode::ENGINE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

/// Result type alias for `LineAudit` operations.
pub type Result<T> = std::result::Result<T, LineAuditError>;

// ============================================================================
// Tests
// ============================================================================
