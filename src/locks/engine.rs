//! The file-based concurrency lock.

use super::approver::LockApprover;
use super::exit_hooks::{ExitHooks, HookId};
use super::handoff;
use super::message::LockMessageHandler;
use super::metadata::{LockMetadata, normalize_extra_info};
use super::native::{self, NativeLock, TryLock};
use super::watcher::LockWatcher;
use crate::config::LockConfig;
use crate::error::{LockError, Result};
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// Times to reopen the lock file after locking one its holder had deleted.
const STALE_RETRIES: u32 = 3;

/// An exclusive lock on a lock file, shared between processes.
///
/// The first byte of the lock file carries an OS-level advisory lock; the
/// rest holds [`LockMetadata`] describing the holder. A holder that installs
/// a [`LockMessageHandler`] also runs a watcher thread that answers handoff
/// messages from other processes and periodically re-asserts the lock.
///
/// All operations on one instance are serialized by a single monitor, which
/// the watcher shares. Only one `FileLock` per lock file should exist in a
/// process. Dropping the value releases the lock.
pub struct FileLock {
    pub(crate) inner: Arc<LockInner>,
}

pub(crate) struct LockInner {
    path: PathBuf,
    token: String,
    config: LockConfig,
    listen_for_lost_lock: AtomicBool,
    state: Mutex<LockState>,
}

#[derive(Default)]
pub(crate) struct LockState {
    native: Option<NativeLock>,
    extra_info: Option<String>,
    approver: Option<Arc<dyn LockApprover>>,
    watcher: Option<LockWatcher>,
    exit_hook: Option<HookId>,
}

impl LockState {
    #[cfg(test)]
    pub(crate) fn exit_hook_id(&self) -> Option<HookId> {
        self.exit_hook
    }
}

impl FileLock {
    /// Create an unlocked instance with a token derived from the current time.
    pub fn new(lock_file: impl Into<PathBuf>) -> Self {
        Self::with_config(lock_file, None, LockConfig::default())
    }

    /// Create an unlocked instance with an explicit session token.
    pub fn with_token(lock_file: impl Into<PathBuf>, token: impl Into<String>) -> Self {
        Self::with_config(lock_file, Some(token.into()), LockConfig::default())
    }

    pub fn with_config(
        lock_file: impl Into<PathBuf>,
        token: Option<String>,
        config: LockConfig,
    ) -> Self {
        let token = token.unwrap_or_else(|| Utc::now().timestamp_millis().to_string());
        if let Err(e) = config.validate() {
            warn!(error = %e, "lock config out of range, using minimum timings");
        }
        let listen = config.listen_for_lost_lock;
        Self {
            inner: Arc::new(LockInner {
                path: lock_file.into(),
                token,
                config,
                listen_for_lost_lock: AtomicBool::new(listen),
                state: Mutex::new(LockState::default()),
            }),
        }
    }

    pub fn lock_file(&self) -> &Path {
        self.inner.path()
    }

    pub fn token(&self) -> &str {
        self.inner.token()
    }

    pub fn config(&self) -> &LockConfig {
        self.inner.config()
    }

    /// Owner description of the current hold, as last written or read.
    pub fn extra_info(&self) -> Option<String> {
        self.inner.state().extra_info.clone()
    }

    /// Whether this instance currently holds the native lock.
    pub fn is_locked(&self) -> bool {
        self.inner.state().native.is_some()
    }

    /// Loopback port of the running watcher, if any.
    pub fn watcher_port(&self) -> Option<u16> {
        self.inner.state().watcher.as_ref().map(LockWatcher::port)
    }

    pub fn listen_for_lost_lock(&self) -> bool {
        self.inner.listen_for_lost_lock()
    }

    /// Enable or disable the watcher's periodic assertions.
    pub fn set_listen_for_lost_lock(&self, listen: bool) {
        self.inner.listen_for_lost_lock.store(listen, Ordering::SeqCst);
    }

    pub fn set_approver(&self, approver: Arc<dyn LockApprover>) {
        self.inner.state().approver = Some(approver);
    }

    pub fn clear_approver(&self) {
        self.inner.state().approver = None;
    }

    /// Acquire the lock without messaging the current holder.
    ///
    /// Fails with `AlreadyLocked` (carrying the holder's `extra_info`, when
    /// known) if another session owns the lock.
    pub fn acquire_lock(&self, extra_info: Option<&str>) -> Result<()> {
        self.acquire_lock_with_message(None, None, extra_info)
    }

    /// Acquire the lock, or contact whoever holds it.
    ///
    /// # Arguments
    ///
    /// * `message` - Sent to the current holder if the lock is taken. The
    ///   holder's reply comes back as [`LockError::SentMessage`].
    /// * `handler` - When the lock is obtained, receives messages from other
    ///   processes. Installing one starts the watcher thread.
    /// * `extra_info` - Human-readable owner description stored in the file.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The lock is held (or was already held by this instance)
    /// * `Err(LockError::SentMessage)` - Holder reached; reply attached
    /// * `Err(LockError::AlreadyLocked)` - Holder exists but was not reached
    /// * `Err(LockError::CannotCreate)` - Unexpected I/O failure
    /// * Any error returned by the installed approver
    pub fn acquire_lock_with_message(
        &self,
        message: Option<&str>,
        handler: Option<Arc<dyn LockMessageHandler>>,
        extra_info: Option<&str>,
    ) -> Result<()> {
        self.inner.acquire(message, handler, extra_info)
    }

    /// Re-validate a previously acquired lock.
    ///
    /// Also claims the native lock for an instance that was constructed with
    /// the token of an existing hold but never acquired it.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The lock is still ours
    /// * `Err(LockError::Uncertain)` - Lock directory unreachable; retry later
    /// * `Err(LockError::NotLocked)` - Lock file is gone; the lock was lost
    /// * `Err(LockError::AlreadyLocked)` - Another session took the lock
    pub fn assert_lock(&self) -> Result<()> {
        let mut state = self.inner.state();
        self.inner.assert_locked(&mut state, false)
    }

    /// Release the lock, deleting the lock file if it is currently held.
    pub fn release_lock(&self) {
        self.inner.release(None);
    }

    /// Release the lock, deleting the lock file only if `delete_metadata`.
    pub fn release_lock_with(&self, delete_metadata: bool) {
        self.inner.release(Some(delete_metadata));
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.inner.release(None);
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("lock_file", &self.inner.path)
            .field("token", &self.inner.token)
            .finish_non_exhaustive()
    }
}

impl LockInner {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn config(&self) -> &LockConfig {
        &self.config
    }

    pub(crate) fn listen_for_lost_lock(&self) -> bool {
        self.listen_for_lost_lock.load(Ordering::SeqCst)
    }

    /// Lock the per-instance monitor.
    pub(crate) fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Directory holding the lock file; a bare file name lives in `.`.
    fn lock_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn acquire(
        self: &Arc<Self>,
        message: Option<&str>,
        handler: Option<Arc<dyn LockMessageHandler>>,
        extra_info: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state();
        if state.native.is_some() {
            debug!(path = %self.path.display(), "lock already held by this instance");
            return Ok(());
        }

        if let Some(approver) = &state.approver {
            approver.approve_lock(&self.path, extra_info)?;
        }

        match self.try_acquire(&mut state, message, handler, extra_info) {
            Ok(Ok(())) => {
                debug!(path = %self.path.display(), "obtained lock");
                Ok(())
            }
            Ok(Err(refused)) => Err(refused),
            Err(e) => {
                let watcher = self.release_locked(&mut state, false);
                drop(state);
                if let Some(watcher) = watcher {
                    watcher.join();
                }
                Err(LockError::CannotCreate { source: Some(e) })
            }
        }
    }

    /// The outer error is an unexpected I/O failure; the inner one is a
    /// typed refusal from the handoff client.
    fn try_acquire(
        self: &Arc<Self>,
        state: &mut LockState,
        message: Option<&str>,
        handler: Option<Arc<dyn LockMessageHandler>>,
        extra_info: Option<&str>,
    ) -> io::Result<Result<()>> {
        let mut attempts = 0;
        let native = loop {
            let file = native::open_lock_file(&self.path)?;
            match NativeLock::try_acquire(file, &self.path)? {
                TryLock::Acquired(native) => break native,
                TryLock::Contended(file) => {
                    return Ok(Err(handoff::contact_holder(
                        &self.path,
                        &file,
                        message,
                        self.config.message_timeout(),
                    )));
                }
                // The previous holder deleted the file we opened; open again.
                TryLock::Stale if attempts < STALE_RETRIES => attempts += 1,
                TryLock::Stale => return Ok(Err(LockError::already_locked(None))),
            }
        };

        match handler {
            Some(handler) => {
                state.watcher = Some(LockWatcher::start(self, &native, handler, extra_info)?);
            }
            None => LockMetadata::new("", 0, self.token.as_str(), extra_info)
                .write_to(native.file())?,
        }

        state.native = Some(native);
        state.extra_info = normalize_extra_info(extra_info);
        if state.exit_hook.is_none() {
            state.exit_hook = Some(ExitHooks::global().register(self));
        }
        Ok(Ok(()))
    }

    /// Re-validate the lock. Callers must hold the monitor via `state`.
    ///
    /// With `force_native_reassert`, the native lock is given up and taken
    /// again to prove it still belongs to us.
    pub(crate) fn assert_locked(
        self: &Arc<Self>,
        state: &mut LockState,
        force_native_reassert: bool,
    ) -> Result<()> {
        if !self.lock_dir().is_dir() {
            // Typical of a dropped network share: we cannot tell whether the
            // lock survived.
            debug!(path = %self.path.display(), "lock directory does not exist");
            return Err(LockError::Uncertain {
                path: self.path.clone(),
            });
        }

        if !self.path.exists() {
            // Someone else claimed and released the lock in the meantime, so
            // the protected data can no longer be trusted.
            debug!(path = %self.path.display(), "lock file no longer exists");
            self.drop_native(state);
            return Err(LockError::NotLocked {
                path: self.path.clone(),
            });
        }

        let fresh = native::open_lock_file(&self.path).map_err(|e| {
            warn!(error = %e, "unexpected error when asserting file lock");
            LockError::failure(format!("failed to reopen '{}'", self.path.display()), e)
        })?;

        let metadata = LockMetadata::read_from(&fresh).map_err(|e| {
            warn!(error = %e, "unexpected error when asserting file lock");
            LockError::failure(
                format!("failed to read lock metadata from '{}'", self.path.display()),
                e,
            )
        })?;

        let metadata = match metadata {
            None => {
                debug!(path = %self.path.display(), "lock file could not be read");
                self.drop_native(state);
                return Err(LockError::already_locked(None));
            }
            Some(metadata) if metadata.token != self.token => {
                debug!(path = %self.path.display(), "lock was lost");
                self.drop_native(state);
                return Err(LockError::already_locked(metadata.extra_info));
            }
            Some(metadata) => metadata,
        };

        // The file still carries our token; adopt its owner description.
        state.extra_info = metadata.extra_info;

        if state.native.is_none()
            && let Some(approver) = &state.approver
        {
            approver.approve_lock(&self.path, state.extra_info.as_deref())?;
        }

        let attempt = match state.native.take() {
            Some(held) if force_native_reassert => {
                held.reassert(fresh, &self.path, self.config.reassert_delay())
            }
            Some(held) => {
                // Keep the handle obtained long ago; the fresh one was only
                // needed to read the metadata.
                state.native = Some(held);
                trace!(path = %self.path.display(), "lock is valid");
                return Ok(());
            }
            None => NativeLock::try_acquire(fresh, &self.path),
        };

        match attempt {
            Ok(TryLock::Acquired(native)) => {
                state.native = Some(native);
                if state.exit_hook.is_none() {
                    state.exit_hook = Some(ExitHooks::global().register(self));
                }
                trace!(path = %self.path.display(), "lock is valid");
                Ok(())
            }
            Ok(TryLock::Contended(_) | TryLock::Stale) => {
                debug!(path = %self.path.display(), "lock could not be reestablished");
                Err(LockError::already_locked(None))
            }
            Err(e) => {
                warn!(error = %e, "unexpected error when asserting file lock");
                Err(LockError::failure(
                    format!("failed to reestablish lock on '{}'", self.path.display()),
                    e,
                ))
            }
        }
    }

    fn drop_native(&self, state: &mut LockState) {
        if let Some(native) = state.native.take() {
            native.release();
        }
    }

    /// Release under the monitor, then wait for the watcher outside it: the
    /// watcher takes the same monitor for its assertions.
    fn release(&self, delete_metadata: Option<bool>) {
        let watcher = {
            let mut state = self.state();
            let delete = delete_metadata.unwrap_or(state.native.is_some());
            self.release_locked(&mut state, delete)
        };
        if let Some(watcher) = watcher {
            watcher.join();
        }
    }

    fn release_locked(&self, state: &mut LockState, delete_metadata: bool) -> Option<LockWatcher> {
        let watcher = state.watcher.take();
        if let Some(watcher) = &watcher {
            watcher.terminate();
        }

        if state.native.is_some() || delete_metadata {
            debug!(path = %self.path.display(), "unlocking lock");
        }
        self.drop_native(state);

        if delete_metadata
            && let Err(e) = fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            debug!(error = %e, path = %self.path.display(), "failed to delete lock file");
        }

        state.extra_info = None;

        if let Some(id) = state.exit_hook.take() {
            ExitHooks::global().deregister(id);
        }

        watcher
    }

    /// Release from the termination handler. The watcher is told to stop
    /// but not joined: the process is about to exit.
    pub(crate) fn release_at_exit(&self) {
        let mut state = self.state();
        let delete = state.native.is_some();
        // The registry already dropped this entry while running the hooks.
        state.exit_hook = None;
        drop(self.release_locked(&mut state, delete));
    }
}
