//! LockConfig struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Timing and behavior settings for a [`crate::locks::FileLock`].
///
/// The defaults are the values the lock protocol was tuned with; none of them
/// is an invariant, so every one can be overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    // =========================================================================
    // Watcher settings
    // =========================================================================
    /// Seconds between periodic lock assertions by the watcher thread.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Shortened interval used after an assertion came back uncertain.
    #[serde(default = "default_uncertain_check_interval_secs")]
    pub uncertain_check_interval_secs: u64,

    /// Whether the watcher should periodically assert that the lock is held.
    #[serde(default = "default_true")]
    pub listen_for_lost_lock: bool,

    /// Milliseconds between polls of the watcher's listening socket.
    ///
    /// Bounds how long `release_lock` waits for the watcher to notice it
    /// was terminated.
    #[serde(default = "default_accept_poll_ms")]
    pub accept_poll_ms: u64,

    // =========================================================================
    // Lock protocol settings
    // =========================================================================
    /// Pause between releasing and reacquiring the native lock during a
    /// forced reassertion.
    #[serde(default = "default_reassert_delay_ms")]
    pub reassert_delay_ms: u64,

    /// Bound on connecting to, and reading a reply from, a lock holder.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            uncertain_check_interval_secs: default_uncertain_check_interval_secs(),
            listen_for_lost_lock: default_true(),
            accept_poll_ms: default_accept_poll_ms(),
            reassert_delay_ms: default_reassert_delay_ms(),
            message_timeout_ms: default_message_timeout_ms(),
        }
    }
}
