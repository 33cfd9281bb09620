//! Error types for dirlock.
//!
//! Uses thiserror for derive macros. Every way a lock operation can fail is a
//! variant of [`LockError`], so callers can match on the outcome instead of
//! parsing messages.

use crate::exit_codes;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure conditions reported by lock operations.
///
/// All variants except [`LockError::Uncertain`] are fatal: the caller does
/// not hold the lock. `Uncertain` means the lock may still be ours and the
/// assertion should be retried later.
#[derive(Error, Debug)]
pub enum LockError {
    /// Generic failure, usually an unexpected I/O error during assertion.
    #[error("lock failure: {message}")]
    Failure {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// Someone else owns the lock and we could not (or did not) reach them.
    #[error(
        "lock is held by another process{}",
        .extra_info.as_deref().map(|info| format!(" ({info})")).unwrap_or_default()
    )]
    AlreadyLocked {
        extra_info: Option<String>,
        #[source]
        source: Option<io::Error>,
    },

    /// Someone else owns the lock; we reached them and they replied.
    #[error("lock holder replied: {response}")]
    SentMessage { response: String },

    /// The lock directory is unreachable, so validity cannot be determined.
    #[error("cannot verify lock: directory for '{}' is unreachable", .path.display())]
    Uncertain { path: PathBuf },

    /// The lock file disappeared; another session claimed and released it.
    #[error("lock was lost: '{}' no longer exists", .path.display())]
    NotLocked { path: PathBuf },

    /// An unexpected low-level failure prevented the lock from being created.
    #[error("cannot create lock{}", .source.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    CannotCreate {
        #[source]
        source: Option<io::Error>,
    },

    /// A protected file is not writable, so the lock was refused.
    #[error("cannot lock: '{}' is read-only", .path.display())]
    ReadOnly { path: PathBuf },

    /// Invalid configuration values or an unreadable config file.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LockError {
    pub(crate) fn already_locked(extra_info: Option<String>) -> Self {
        LockError::AlreadyLocked {
            extra_info,
            source: None,
        }
    }

    pub(crate) fn failure(message: impl Into<String>, source: io::Error) -> Self {
        LockError::Failure {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Whether the caller must consider the lock definitely not held.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LockError::Uncertain { .. })
    }

    /// Human-readable owner description, for `AlreadyLocked` failures.
    pub fn extra_info(&self) -> Option<&str> {
        match self {
            LockError::AlreadyLocked { extra_info, .. } => extra_info.as_deref(),
            _ => None,
        }
    }

    /// The holder's reply, for `SentMessage` failures.
    pub fn response(&self) -> Option<&str> {
        match self {
            LockError::SentMessage { response } => Some(response),
            _ => None,
        }
    }

    /// Returns the CLI exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            LockError::Config(_) => exit_codes::USER_ERROR,
            LockError::Failure { .. } | LockError::CannotCreate { .. } | LockError::ReadOnly { .. } => {
                exit_codes::LOCK_FAILURE
            }
            LockError::AlreadyLocked { .. } => exit_codes::ALREADY_LOCKED,
            LockError::SentMessage { .. } => exit_codes::MESSAGE_SENT,
            LockError::Uncertain { .. } => exit_codes::LOCK_UNCERTAIN,
            LockError::NotLocked { .. } => exit_codes::LOCK_LOST,
        }
    }
}

/// Result type alias for dirlock operations.
pub type Result<T> = std::result::Result<T, LockError>;
