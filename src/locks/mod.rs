//! Cross-process file locking for dirlock.
//!
//! This module implements a lock that independent processes, possibly on
//! different machines sharing a network filesystem, use to coordinate
//! exclusive access to a data directory.
//!
//! # Lock Files
//!
//! The lock file is any path chosen by the caller. Byte 0 carries an
//! exclusive OS-level advisory lock and is never read as data. The holder
//! writes its metadata after it, one field per line:
//! - host IP address (empty when no watcher runs)
//! - watcher port (0 when no watcher runs)
//! - session token
//! - optional owner description
//!
//! # Handoff
//!
//! A holder that installs a [`LockMessageHandler`] runs a watcher thread on
//! a loopback port. A process that finds the lock taken can send that
//! watcher one line of text and receive the handler's reply, surfaced as
//! [`crate::error::LockError::SentMessage`].
//!
//! # Reassertion
//!
//! Holders periodically re-read the lock file to confirm their token is
//! still there. An unreachable lock directory is reported as non-fatal
//! `Uncertain`; a missing file or foreign token means the lock was lost.

mod approver;
mod engine;
mod exit_hooks;
mod handoff;
mod message;
mod metadata;
mod native;
mod watcher;

#[cfg(test)]
mod tests;

// Re-export public API
pub use approver::{LockApprover, WritableFilesApprover};
pub use engine::FileLock;
pub use message::{HandlerError, LOCK_LOST_MESSAGE, LockMessage, LockMessageHandler};
pub use metadata::LockMetadata;
pub use native::is_lock_held;
