//! Exit code constants for the dirlock CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config)
//! - 2: Generic lock failure (I/O, read-only files)
//! - 3: Lock held by another process
//! - 4: Lock holder was messaged instead of acquiring
//! - 5: Lock state uncertain (lock directory unreachable)
//! - 6: Lock was lost while held

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or invalid configuration.
pub const USER_ERROR: i32 = 1;

/// Generic lock failure: I/O error, read-only files, cannot create lock.
pub const LOCK_FAILURE: i32 = 2;

/// Another process holds the lock.
pub const ALREADY_LOCKED: i32 = 3;

/// Another process holds the lock and replied to our message.
pub const MESSAGE_SENT: i32 = 4;

/// Lock validity could not be determined.
pub const LOCK_UNCERTAIN: i32 = 5;

/// A held lock was lost.
pub const LOCK_LOST: i32 = 6;
