//! Error types for safetid.
//!
//! This module defines all error types used throughout the safetid crate.
//! A denied access code is not an error: it is reported through
//! [`ValidationOutcome`](crate::credential::ValidationOutcome).

use std::path::PathBuf;
use thiserror::Error;

/// The kind of record a [`Error::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A medical profile.
    Profile,
    /// An access credential.
    Credential,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Profile => write!(f, "profile"),
            Self::Credential => write!(f, "credential"),
        }
    }
}

/// The main error type for safetid operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Record Errors ===
    /// No record exists for the owner.
    #[error("no {kind} found for owner '{owner_id}'")]
    NotFound {
        /// Which record was missing.
        kind: RecordKind,
        /// The owner that was looked up.
        owner_id: String,
    },

    /// The caller supplied malformed input (rejected before storage access).
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what was wrong.
        message: String,
    },

    /// A save carried a stale version.
    #[error("stale write for owner '{owner_id}': expected version {expected}, found {actual}")]
    Conflict {
        /// The owner whose profile was being written.
        owner_id: String,
        /// The version the caller based its write on.
        expected: u64,
        /// The version currently stored.
        actual: u64,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A storage operation failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system or network operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for safetid operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a not-found error for a profile.
    #[must_use]
    pub fn profile_not_found(owner_id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: RecordKind::Profile,
            owner_id: owner_id.into(),
        }
    }

    /// Create a not-found error for a credential.
    #[must_use]
    pub fn credential_not_found(owner_id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: RecordKind::Credential,
            owner_id: owner_id.into(),
        }
    }

    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means the record does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error was caused by malformed caller input.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }

    /// Check if the user may simply retry the operation.
    ///
    /// Only transport and storage failures are retryable; every other kind
    /// resolves to a deterministic outcome.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_) | Self::DatabaseOpen { .. } | Self::Io(_)
        )
    }
}
