//! Policy hooks consulted before a lock is granted.

use crate::error::{LockError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Decides whether a lock may be granted.
///
/// Consulted before a first-time acquisition only; an approver never gets to
/// revoke a lock that is already held. Any error it returns is passed to the
/// caller unchanged.
pub trait LockApprover: Send + Sync {
    fn approve_lock(&self, lock_file: &Path, extra_info: Option<&str>) -> Result<()>;
}

impl<F> LockApprover for F
where
    F: Fn(&Path, Option<&str>) -> Result<()> + Send + Sync,
{
    fn approve_lock(&self, lock_file: &Path, extra_info: Option<&str>) -> Result<()> {
        self(lock_file, extra_info)
    }
}

/// Refuses the lock when any regular file in the protected directory is
/// read-only, since the holder would be unable to save its changes.
#[derive(Debug, Clone)]
pub struct WritableFilesApprover {
    directory: PathBuf,
}

impl WritableFilesApprover {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

impl LockApprover for WritableFilesApprover {
    fn approve_lock(&self, lock_file: &Path, _extra_info: Option<&str>) -> Result<()> {
        let entries = fs::read_dir(&self.directory).map_err(|e| {
            LockError::failure(
                format!("failed to read directory '{}'", self.directory.display()),
                e,
            )
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| LockError::failure("failed to read directory entry", e))?;
            let path = entry.path();
            if path == lock_file {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if metadata.is_file() && metadata.permissions().readonly() {
                return Err(LockError::ReadOnly { path });
            }
        }

        Ok(())
    }
}
