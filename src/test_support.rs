use crate::config::LockConfig;
use crate::locks::{HandlerError, LockMessage, LockMessageHandler};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A temp directory and a lock file path inside it.
pub(crate) fn lock_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("lock.dat");
    (temp_dir, path)
}

/// Config with short watcher intervals so tests observe checks quickly.
pub(crate) fn fast_config() -> LockConfig {
    LockConfig {
        check_interval_secs: 1,
        uncertain_check_interval_secs: 1,
        reassert_delay_ms: 10,
        message_timeout_ms: 2000,
        accept_poll_ms: 10,
        listen_for_lost_lock: true,
    }
}

/// Handler that records every message and answers with a fixed reply.
pub(crate) struct RecordingHandler {
    reply: Option<String>,
    received: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub(crate) fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            received: Mutex::new(Vec::new()),
        })
    }

    /// A handler that fails every message.
    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            received: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn received(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl LockMessageHandler for RecordingHandler {
    fn handle_message(&self, message: &LockMessage) -> Result<String, HandlerError> {
        self.received
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(message.message().to_string());
        self.reply
            .clone()
            .ok_or_else(|| "unrecognized message".into())
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub(crate) fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}
