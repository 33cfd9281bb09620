//! Implementation of the `dirlock check` command.

use crate::cli::CheckArgs;
use dirlock::config::LockConfig;
use dirlock::error::Result;
use dirlock::locks::FileLock;

/// Assert a lock under a known session token.
///
/// Succeeds when the lock file still carries the token and the native lock
/// can be taken, which is how a session resumes a hold released with
/// `hold --keep-file`.
pub fn cmd_check(args: CheckArgs, config: LockConfig) -> Result<()> {
    let lock = FileLock::with_config(&args.lock_file, Some(args.token), config);
    lock.assert_lock()?;

    match lock.extra_info() {
        Some(info) => println!("lock {} is valid ({})", args.lock_file.display(), info),
        None => println!("lock {} is valid", args.lock_file.display()),
    }

    if args.keep_file {
        lock.release_lock_with(false);
    } else {
        lock.release_lock();
    }
    Ok(())
}
