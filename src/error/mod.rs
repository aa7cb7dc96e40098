//! Error types and handling for `beads_ops`.
//!
//! Every implementation of [`crate::ops::Ops`] reports failures through
//! [`OpsError`]. Callers branch on [`OpsError::kind`] rather than on message
//! text; the wrapped tool's stderr is carried verbatim and never parsed
//! beyond the two translations the wrapper performs (`NotInstalled` and
//! `NotFound`).
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - `ErrorKind` is the stable taxonomy callers and the harness report on
//! - I/O and JSON failures fold into `ErrorKind::Internal`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `beads_ops` operations.
#[derive(Error, Debug)]
pub enum OpsError {
    /// The external tool binary could not be executed.
    #[error("bd is not installed or not executable: {binary}")]
    NotInstalled { binary: String },

    /// A referenced entity does not exist.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// The working directory has no storage directory.
    #[error("Not a beads repository: {path}")]
    NotARepo { path: PathBuf },

    /// Prefix mismatch or an ID whose prefix cannot be routed.
    #[error("Routing error for '{id}': {reason}")]
    Routing { id: String, reason: String },

    /// A documented input constraint was violated.
    #[error("Invalid {field}: {reason}")]
    BadArgument { field: String, reason: String },

    /// Any other failure reported by the external tool.
    #[error("bd {command} failed (exit {exit_code:?}): {stderr}")]
    Upstream {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// No town root above the starting directory.
    #[error("Town root not found above '{start}'")]
    TownRootNotFound { start: PathBuf },

    /// Configuration or on-disk layout error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Stable error taxonomy surfaced by the `Ops` interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotInstalled,
    NotFound,
    NotARepo,
    Routing,
    BadArgument,
    Upstream,
    TownRootNotFound,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::NotFound => "not_found",
            Self::NotARepo => "not_a_repo",
            Self::Routing => "routing",
            Self::BadArgument => "bad_argument",
            Self::Upstream => "upstream",
            Self::TownRootNotFound => "town_root_not_found",
            Self::Internal => "internal",
        }
    }

    /// Process exit code for the `bdops` binary.
    ///
    /// - 1: internal errors
    /// - 2: environment (`bd` missing, no repo, no town)
    /// - 3: entity not found
    /// - 4: invalid arguments or routing
    /// - 5: upstream `bd` failure
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Internal => 1,
            Self::NotInstalled | Self::NotARepo | Self::TownRootNotFound => 2,
            Self::NotFound => 3,
            Self::BadArgument | Self::Routing => 4,
            Self::Upstream => 5,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OpsError {
    /// Classify this error into the stable taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotInstalled { .. } => ErrorKind::NotInstalled,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotARepo { .. } => ErrorKind::NotARepo,
            Self::Routing { .. } => ErrorKind::Routing,
            Self::BadArgument { .. } => ErrorKind::BadArgument,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::TownRootNotFound { .. } => ErrorKind::TownRootNotFound,
            Self::Config(_) | Self::Io(_) | Self::Json(_) | Self::Yaml(_) => ErrorKind::Internal,
        }
    }

    /// True when the error means "the entity does not exist".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when tests should be skipped rather than failed.
    #[must_use]
    pub const fn is_not_installed(&self) -> bool {
        matches!(self, Self::NotInstalled { .. })
    }

    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    #[must_use]
    pub fn bad_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn routing(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Routing {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type using `OpsError`.
pub type Result<T> = std::result::Result<T, OpsError>;
