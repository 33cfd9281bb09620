//! Implementation of the `dirlock hold` command.
//!
//! Acquires the lock and keeps it until stdin closes or a `release` line is
//! read. Messages from other processes are printed as they arrive and
//! answered with the configured reply.

use crate::cli::HoldArgs;
use dirlock::config::LockConfig;
use dirlock::error::{LockError, Result};
use dirlock::locks::{FileLock, HandlerError, LockMessage, LockMessageHandler};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Line on stdin that gives the lock up.
const RELEASE_COMMAND: &str = "release";

#[derive(Debug)]
enum HoldEvent {
    Message(String),
    Lost,
    Release,
}

pub fn cmd_hold(args: HoldArgs, config: LockConfig) -> Result<()> {
    let lock = FileLock::with_config(&args.lock_file, args.token.clone(), config);
    let (tx, rx) = mpsc::channel();

    let handler = if args.no_listen {
        None
    } else {
        Some(message_handler(tx.clone(), args.respond.clone()))
    };
    lock.acquire_lock_with_message(None, handler, args.info.as_deref())?;

    let port = lock
        .watcher_port()
        .map_or_else(|| "none".to_string(), |port| port.to_string());
    println!(
        "locked {} token={} port={}",
        lock.lock_file().display(),
        lock.token(),
        port
    );

    spawn_stdin_reader(tx);

    // Without a watcher nobody re-asserts the lock, so do it here.
    let poll = args.no_listen.then(|| lock.config().check_interval());
    wait_for_release(&lock, &rx, poll)?;

    if args.keep_file {
        lock.release_lock_with(false);
    } else {
        lock.release_lock();
    }
    println!("released {}", lock.lock_file().display());
    Ok(())
}

fn message_handler(tx: Sender<HoldEvent>, reply: String) -> Arc<dyn LockMessageHandler> {
    Arc::new(move |msg: &LockMessage| -> std::result::Result<String, HandlerError> {
        let event = if msg.is_lock_lost() {
            HoldEvent::Lost
        } else {
            HoldEvent::Message(msg.message().to_string())
        };
        tx.send(event)?;
        Ok(reply.clone())
    })
}

fn spawn_stdin_reader(tx: Sender<HoldEvent>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim() == RELEASE_COMMAND => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "stopped reading stdin");
                    break;
                }
            }
        }
        // The receiver is gone only if the lock was already lost.
        let _ = tx.send(HoldEvent::Release);
    });
}

fn wait_for_release(
    lock: &FileLock,
    rx: &Receiver<HoldEvent>,
    poll: Option<Duration>,
) -> Result<()> {
    loop {
        let event = match poll {
            Some(interval) => match rx.recv_timeout(interval) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    match lock.assert_lock() {
                        Ok(()) => {}
                        Err(e) if !e.is_fatal() => warn!(error = %e, "lock state uncertain"),
                        Err(e) => return Err(e),
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => HoldEvent::Release,
            },
            None => rx.recv().unwrap_or(HoldEvent::Release),
        };

        match event {
            HoldEvent::Message(text) => println!("message: {}", text),
            HoldEvent::Lost => {
                return Err(LockError::NotLocked {
                    path: lock.lock_file().to_path_buf(),
                });
            }
            HoldEvent::Release => return Ok(()),
        }
    }
}
