//! Background listener run by a lock holder.
//!
//! The watcher accepts handoff messages from processes that want the lock
//! and, between connections, re-asserts that the lock is still held. Its
//! wait for a connection doubles as the interval between assertions.

use super::engine::LockInner;
use super::handoff::current_host;
use super::message::{HandlerError, LOCK_LOST_MESSAGE, LockMessage, LockMessageHandler};
use super::metadata::{LockMetadata, read_line, sanitize_line};
use super::native::NativeLock;
use crate::config::LockConfig;
use crate::error::LockError;
use std::io::{self, BufReader, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Handle on a running watcher thread.
#[derive(Debug)]
pub(crate) struct LockWatcher {
    running: Arc<AtomicBool>,
    port: u16,
    handle: Option<JoinHandle<()>>,
}

impl LockWatcher {
    /// Bind a loopback port, advertise it in the lock file and start the
    /// watcher thread.
    pub(crate) fn start(
        lock: &Arc<LockInner>,
        native: &NativeLock,
        handler: Arc<dyn LockMessageHandler>,
        extra_info: Option<&str>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();

        LockMetadata::new(current_host(), port, lock.token(), extra_info).write_to(native.file())?;

        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker {
            lock: Arc::downgrade(lock),
            lock_file: lock.path().to_path_buf(),
            token: lock.token().to_string(),
            config: lock.config().clone(),
            listener,
            handler,
            running: Arc::clone(&running),
        };

        let handle = thread::Builder::new()
            .name(format!("dirlock watcher {}", lock.path().display()))
            .spawn(move || worker.run())?;

        debug!(port, path = %lock.path().display(), "lock watcher started");
        Ok(Self {
            running,
            port,
            handle: Some(handle),
        })
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Ask the thread to stop. It notices within one accept poll.
    pub(crate) fn terminate(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for the thread to finish, unless called from the thread itself
    /// (a message handler releasing the lock).
    pub(crate) fn join(mut self) {
        if let Some(handle) = self.handle.take()
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            warn!("lock watcher thread panicked");
        }
    }
}

struct Worker {
    lock: Weak<LockInner>,
    lock_file: PathBuf,
    token: String,
    config: LockConfig,
    listener: TcpListener,
    handler: Arc<dyn LockMessageHandler>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn run(self) {
        let mut reassert_needed = false;
        let mut checks_enabled = true;
        let mut interval = Some(self.config.check_interval());

        while self.is_running() {
            if let Some(stream) = self.accept_within(interval)
                && self.is_running()
            {
                self.handle(stream);
            }

            if !checks_enabled {
                continue;
            }
            let Some(lock) = self.lock.upgrade() else {
                break;
            };
            if !lock.listen_for_lost_lock() {
                continue;
            }

            let result = {
                let mut state = lock.state();
                if !self.is_running() {
                    break;
                }
                let start = Instant::now();
                let result = lock.assert_locked(&mut state, reassert_needed);
                let elapsed_ms = start.elapsed().as_millis() as u64;
                trace!(elapsed_ms, "lock assertion finished");
                result
            };

            match result {
                Ok(()) => {
                    reassert_needed = false;
                    interval = Some(self.config.check_interval());
                }
                Err(LockError::Uncertain { .. }) => {
                    // Losing sight of the lock directory usually means the
                    // network share dropped, which can also drop the native
                    // lock. Reassert it natively on the next pass.
                    reassert_needed = true;
                    interval = Some(self.config.uncertain_check_interval());
                }
                Err(e) => {
                    debug!(error = %e, path = %self.lock_file.display(), "watcher detected lost lock");
                    if let Err(e) = self.dispatch(LOCK_LOST_MESSAGE) {
                        debug!(error = %e, "lock lost handler failed");
                    }
                    checks_enabled = false;
                    interval = None;
                }
            }
        }

        debug!(path = %self.lock_file.display(), "lock watcher stopped");
    }

    /// Wait for a connection for up to `interval` (forever when `None`),
    /// giving up early once terminated.
    fn accept_within(&self, interval: Option<Duration>) -> Option<TcpStream> {
        let deadline = interval.map(|interval| Instant::now() + interval);
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => return Some(stream),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => debug!(error = %e, "lock watcher accept failed"),
            }

            if !self.is_running() {
                return None;
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return None;
            }
            thread::sleep(self.config.accept_poll());
        }
    }

    fn handle(&self, stream: TcpStream) {
        if let Err(e) = self.respond(&stream) {
            debug!(error = %e, "failed to answer lock message");
        }
    }

    fn respond(&self, stream: &TcpStream) -> io::Result<()> {
        // Accepted sockets inherit non-blocking mode on some platforms.
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.config.message_timeout()))?;
        stream.set_write_timeout(Some(self.config.message_timeout()))?;

        let mut reader = BufReader::new(stream);
        let Some(message) = read_line(&mut reader)? else {
            return Ok(());
        };

        let response = match self.dispatch(&message) {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "lock message handler failed");
                return Ok(());
            }
        };

        let mut writer = stream;
        writer.write_all(format!("{}\n{}\n", self.token, sanitize_line(&response)).as_bytes())?;
        writer.flush()
    }

    fn dispatch(&self, message: &str) -> Result<String, HandlerError> {
        let message = LockMessage::new(self.lock_file.clone(), message);
        self.handler.handle_message(&message)
    }
}
