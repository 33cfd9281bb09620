//! Command implementations for dirlock.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Each command lives in its own module.

mod check;
mod hold;
mod inspect;
mod send;

use crate::cli::Command;
use dirlock::config::LockConfig;
use dirlock::error::Result;

/// Dispatch a command to its implementation.
///
/// This is the main entry point for command execution. Each command
/// is routed to its handler function with the loaded lock settings.
pub fn dispatch(command: Command, config: LockConfig) -> Result<()> {
    match command {
        Command::Hold(args) => hold::cmd_hold(args, config),
        Command::Send(args) => send::cmd_send(args, config),
        Command::Inspect(args) => inspect::cmd_inspect(args),
        Command::Check(args) => check::cmd_check(args, config),
    }
}
