//! Release of held locks when the process is terminated.
//!
//! Every successful acquisition registers its lock here and deregisters on
//! normal release; a normal exit releases locks through `Drop`. On unix the
//! first registration also starts a thread that waits for SIGINT, SIGTERM
//! or SIGHUP, releases whatever is still registered, and exits with the
//! conventional `128 + signal` status.

use super::engine::LockInner;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HookId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    hooks: HashMap<HookId, Weak<LockInner>>,
}

/// A set of locks to release on termination.
#[derive(Default)]
pub(crate) struct ExitHooks {
    registry: Mutex<Registry>,
}

static GLOBAL: LazyLock<ExitHooks> = LazyLock::new(|| {
    install_signal_handlers();
    ExitHooks::default()
});

impl ExitHooks {
    /// The process-wide registry run by the signal handler.
    pub(crate) fn global() -> &'static ExitHooks {
        &GLOBAL
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, lock: &Arc<LockInner>) -> HookId {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = HookId(registry.next_id);
        registry.hooks.insert(id, Arc::downgrade(lock));
        id
    }

    pub(crate) fn deregister(&self, id: HookId) {
        self.registry().hooks.remove(&id);
    }

    pub(crate) fn is_registered(&self, id: HookId) -> bool {
        self.registry().hooks.contains_key(&id)
    }

    /// Release every registered lock that is still alive.
    pub(crate) fn run(&self) {
        let hooks: Vec<Weak<LockInner>> = self
            .registry()
            .hooks
            .drain()
            .map(|(_, lock)| lock)
            .collect();

        for lock in hooks.iter().filter_map(Weak::upgrade) {
            lock.release_at_exit();
        }
    }
}

#[cfg(unix)]
fn install_signal_handlers() {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT, SIGTERM, SIGHUP]) {
        Ok(signals) => signals,
        Err(e) => {
            debug!(error = %e, "failed to install lock release signal handlers");
            return;
        }
    };

    let spawned = std::thread::Builder::new()
        .name("dirlock signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                debug!(signal, "termination signal received, releasing locks");
                ExitHooks::global().run();
                std::process::exit(128 + signal);
            }
        });
    if let Err(e) = spawned {
        debug!(error = %e, "failed to start lock release signal thread");
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {
    debug!("termination signal handlers are not installed on this platform");
}
