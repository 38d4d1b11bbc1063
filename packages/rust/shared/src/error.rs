//! Error types for Vignette.
//!
//! Library crates use [`VignetteError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all Vignette operations.
#[derive(Debug, thiserror::Error)]
pub enum VignetteError {
    /// Network failure, timeout, rate limit, or non-success HTTP status.
    #[error("transport error: {0}")]
    Transport(String),

    /// A collaborator answered with a malformed or non-conforming payload.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Every attempt allowed by the retry policy failed.
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        last: Box<VignetteError>,
    },

    /// Two generated units collapsed onto the same identity key.
    #[error("duplicate unit: {0}")]
    DuplicateConflict(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A mandatory fallback could not be built. The pipeline cannot continue.
    #[error("fatal pipeline error: {0}")]
    Fatal(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, VignetteError>;

/// Failure categories recorded in document diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Validation,
    Exhaustion,
    DuplicateConflict,
    Fatal,
}

impl VignetteError {
    /// Create a transport error from any displayable message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the retry loop should try the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Validation { .. })
    }

    /// Diagnostic category for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(_) => FailureKind::Transport,
            Self::Validation { .. } => FailureKind::Validation,
            Self::Exhausted { .. } => FailureKind::Exhaustion,
            Self::DuplicateConflict(_) => FailureKind::DuplicateConflict,
            Self::Config { .. } | Self::Io { .. } | Self::Fatal(_) => FailureKind::Fatal,
        }
    }

    /// The innermost error behind any `Exhausted` wrapping.
    pub fn root_cause(&self) -> &VignetteError {
        match self {
            Self::Exhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}
