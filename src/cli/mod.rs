//! CLI argument parsing for dirlock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Dirlock: cross-process file-based concurrency lock.
///
/// Processes coordinate exclusive access to a directory through a lock file:
/// - The holder keeps an OS advisory lock on the file
/// - Metadata after the first byte names the holder's session
/// - A holder's watcher answers messages from processes that want the lock
#[derive(Parser, Debug)]
#[command(name = "dirlock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// YAML file with lock timing settings.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log lock activity to stderr (repeat for trace output).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for dirlock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Acquire a lock and hold it until stdin closes.
    ///
    /// Answers messages from other processes while held. Type `release` or
    /// close stdin to give the lock up.
    Hold(HoldArgs),

    /// Send a message to the process holding a lock.
    ///
    /// Prints the holder's reply. If nobody holds the lock, it is acquired
    /// and released again.
    Send(SendArgs),

    /// Print the metadata stored in a lock file.
    Inspect(InspectArgs),

    /// Assert a lock held under a known session token.
    Check(CheckArgs),
}

/// Arguments for the `hold` command.
#[derive(Parser, Debug)]
pub struct HoldArgs {
    /// Path of the lock file.
    pub lock_file: PathBuf,

    /// Owner description stored in the lock file.
    #[arg(long)]
    pub info: Option<String>,

    /// Session token (defaults to the current time in milliseconds).
    #[arg(long)]
    pub token: Option<String>,

    /// Reply sent to processes that message this holder.
    #[arg(long, default_value = "OK")]
    pub respond: String,

    /// Do not start a watcher; other processes cannot message this holder.
    #[arg(long)]
    pub no_listen: bool,

    /// Leave the lock file in place on release.
    #[arg(long)]
    pub keep_file: bool,
}

/// Arguments for the `send` command.
#[derive(Parser, Debug)]
pub struct SendArgs {
    /// Path of the lock file.
    pub lock_file: PathBuf,

    /// Message for the holder.
    pub message: String,

    /// Owner description used if the lock turns out to be free.
    #[arg(long)]
    pub info: Option<String>,
}

/// Arguments for the `inspect` command.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Path of the lock file.
    pub lock_file: PathBuf,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `check` command.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Path of the lock file.
    pub lock_file: PathBuf,

    /// Session token the lock should carry.
    #[arg(long)]
    pub token: String,

    /// Leave the lock file in place afterwards so the session can resume.
    #[arg(long)]
    pub keep_file: bool,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
