//! Implementation of the `dirlock inspect` command.
//!
//! Reads the metadata without taking the lock, so it is safe to run against
//! a lock held by another process.

use crate::cli::InspectArgs;
use dirlock::error::{LockError, Result};
use dirlock::locks::{LockMetadata, is_lock_held};
use serde_json::json;

pub fn cmd_inspect(args: InspectArgs) -> Result<()> {
    let path = &args.lock_file;
    let held = is_lock_held(path)?;
    let metadata = LockMetadata::from_file(path).map_err(|e| LockError::Failure {
        message: format!("failed to read lock file '{}'", path.display()),
        source: Some(e),
    })?;

    if args.json {
        let output = json!({
            "lock_file": path,
            "held": held,
            "metadata": metadata,
        });
        println!("{}", output);
        return Ok(());
    }

    println!("Lock file: {}", path.display());
    println!("Held:      {}", if held { "yes" } else { "no" });
    match metadata {
        Some(meta) => {
            println!("Token:     {}", meta.token);
            println!("Owner:     {}", meta.extra_info.as_deref().unwrap_or("-"));
            if meta.has_listener() {
                println!("Watcher:   {}:{}", meta.host_name, meta.port);
            } else {
                println!("Watcher:   none");
            }
        }
        None => println!("Metadata:  none"),
    }
    Ok(())
}
