//! Messages exchanged with the current lock holder.

use std::path::{Path, PathBuf};

/// Synthetic message dispatched once by the watcher when it detects that the
/// lock was definitely lost.
pub const LOCK_LOST_MESSAGE: &str = "lockLost";

/// Error type returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A message received by the lock holder from another process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockMessage {
    lock_file: PathBuf,
    message: String,
}

impl LockMessage {
    pub fn new(lock_file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            lock_file: lock_file.into(),
            message: message.into(),
        }
    }

    /// The lock file this message was received for.
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this is the watcher's notice that the lock was lost.
    pub fn is_lock_lost(&self) -> bool {
        self.message == LOCK_LOST_MESSAGE
    }
}

/// Receives messages from processes that want the lock we hold.
///
/// The returned string is sent back to the requesting process as the reply
/// (line breaks are replaced by spaces). Returning an error sends no reply.
pub trait LockMessageHandler: Send + Sync {
    fn handle_message(&self, message: &LockMessage) -> Result<String, HandlerError>;
}

impl<F> LockMessageHandler for F
where
    F: Fn(&LockMessage) -> Result<String, HandlerError> + Send + Sync,
{
    fn handle_message(&self, message: &LockMessage) -> Result<String, HandlerError> {
        self(message)
    }
}
