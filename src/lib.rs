//! Dirlock: cross-process file-based concurrency lock.
//!
//! Processes coordinate exclusive access to a data directory through a lock
//! file. Holders can run a loopback watcher so that processes finding the
//! lock taken can message them to negotiate a handoff.
//!
//! ```no_run
//! use dirlock::error::LockError;
//! use dirlock::locks::FileLock;
//!
//! let lock = FileLock::new("/shared/data/lock.dat");
//! match lock.acquire_lock(Some("alice")) {
//!     Ok(()) => println!("locked"),
//!     Err(LockError::AlreadyLocked { extra_info, .. }) => {
//!         println!("in use by {}", extra_info.unwrap_or_default())
//!     }
//!     Err(e) => return Err(e),
//! }
//! lock.release_lock();
//! # Ok::<(), LockError>(())
//! ```

pub mod config;
pub mod error;
pub mod exit_codes;
pub mod locks;

#[cfg(test)]
pub(crate) mod test_support;
