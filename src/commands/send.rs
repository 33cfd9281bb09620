//! Implementation of the `dirlock send` command.

use crate::cli::SendArgs;
use dirlock::config::LockConfig;
use dirlock::error::{LockError, Result};
use dirlock::locks::FileLock;

/// Message the process holding a lock and print its reply.
///
/// A free lock is acquired and immediately released again, since there is
/// nobody to talk to.
pub fn cmd_send(args: SendArgs, config: LockConfig) -> Result<()> {
    let lock = FileLock::with_config(&args.lock_file, None, config);

    match lock.acquire_lock_with_message(Some(&args.message), None, args.info.as_deref()) {
        Err(LockError::SentMessage { response }) => {
            println!("{}", response);
            Ok(())
        }
        Ok(()) => {
            lock.release_lock();
            println!("lock {} was not held", args.lock_file.display());
            Ok(())
        }
        Err(e) => Err(e),
    }
}
