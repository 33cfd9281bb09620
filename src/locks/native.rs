//! OS-level exclusive lock on the lock file.
//!
//! Locks are advisory and taken with `fs2`. They are tied to the open file
//! handle, so two handles on the same file conflict even inside one process,
//! and dropping the handle releases the lock.

use crate::error::{LockError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Open (creating if needed) the lock file for reading and writing.
pub(crate) fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

/// Outcome of a non-blocking lock attempt.
#[derive(Debug)]
pub(crate) enum TryLock {
    Acquired(NativeLock),
    /// Someone else holds the lock; the handle is returned for inspection.
    Contended(File),
    /// The lock was taken on a file that no longer sits at the lock path,
    /// because its holder deleted it between our open and our lock.
    Stale,
}

/// An exclusive native lock, held for as long as this value lives.
#[derive(Debug)]
pub(crate) struct NativeLock {
    file: File,
}

impl NativeLock {
    /// Try to lock `file`, which must have been opened from `path`.
    pub(crate) fn try_acquire(file: File, path: &Path) -> io::Result<TryLock> {
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(TryLock::Contended(file)),
            Err(e) => return Err(e),
        }

        match is_same_file(&file, path) {
            Ok(true) => Ok(TryLock::Acquired(NativeLock { file })),
            Ok(false) => {
                debug!(path = %path.display(), "locked a lock file that was replaced");
                NativeLock { file }.release();
                Ok(TryLock::Stale)
            }
            Err(e) => {
                NativeLock { file }.release();
                Err(e)
            }
        }
    }

    pub(crate) fn file(&self) -> &File {
        &self.file
    }

    /// Unlock and close the handle.
    pub(crate) fn release(self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(error = %e, "failed to unlock native lock");
        }
    }

    /// Verify the native lock is still ours by giving it up and taking it
    /// again through `fresh`.
    ///
    /// There is no portable query for "do we still hold this lock" (a lock
    /// can vanish silently when a network mount drops), so the only proof is
    /// a successful reacquisition. The pause lets a competing process win the
    /// race if it was already waiting.
    pub(crate) fn reassert(self, fresh: File, path: &Path, delay: Duration) -> io::Result<TryLock> {
        self.release();
        thread::sleep(delay);
        NativeLock::try_acquire(fresh, path)
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Whether the open handle and the directory entry at `path` are one file.
#[cfg(unix)]
fn is_same_file(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let on_disk = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let held = file.metadata()?;
    Ok(held.dev() == on_disk.dev() && held.ino() == on_disk.ino())
}

/// Open handles block deletion on this platform, so the file cannot have
/// been replaced underneath us.
#[cfg(not(unix))]
fn is_same_file(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}

/// Whether some handle currently holds the native lock on `path`.
///
/// Never creates or writes the lock file. The check takes a shared lock for
/// an instant, so an exclusive acquirer racing it may be turned away as if
/// the lock were held. A lock held by this process through another handle
/// also counts as held.
pub fn is_lock_held<P: AsRef<Path>>(path: P) -> Result<bool> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(false);
    }

    let file = File::open(path)
        .map_err(|e| LockError::failure(format!("failed to open '{}'", path.display()), e))?;

    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            if let Err(e) = FileExt::unlock(&file) {
                debug!(error = %e, "failed to drop shared lock");
            }
            Ok(false)
        }
        Err(e) if is_contended(&e) => Ok(true),
        Err(e) => Err(LockError::failure(
            format!("failed to check lock on '{}'", path.display()),
            e,
        )),
    }
}
