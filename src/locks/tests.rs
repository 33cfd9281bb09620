//! Tests for the locks subsystem.

use super::*;
use crate::error::LockError;
use crate::locks::handoff::current_host;
use crate::test_support::{RecordingHandler, fast_config, lock_dir, wait_for};
use serial_test::serial;
use std::net::{Ipv4Addr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn handler(reply: &str) -> (Arc<RecordingHandler>, Option<Arc<dyn LockMessageHandler>>) {
    let recorder = RecordingHandler::replying(reply);
    let handler: Arc<dyn LockMessageHandler> = recorder.clone();
    (recorder, Some(handler))
}

#[test]
fn test_acquire_and_release_track_state() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::new(&path);
    assert!(!lock.is_locked());

    lock.acquire_lock(Some("ownerA")).unwrap();
    assert!(lock.is_locked());
    assert!(path.exists());
    assert_eq!(lock.extra_info().as_deref(), Some("ownerA"));

    lock.release_lock();
    assert!(!lock.is_locked());
    assert!(!path.exists());
    assert_eq!(lock.extra_info(), None);

    lock.acquire_lock(None).unwrap();
    assert!(lock.is_locked());
    lock.release_lock();
    assert!(!lock.is_locked());
}

#[test]
fn test_release_when_unlocked_is_noop() {
    let (_temp_dir, path) = lock_dir();
    std::fs::write(&path, "\n\n0\nSOMEONE\nother\n").unwrap();

    let lock = FileLock::new(&path);
    lock.release_lock();
    lock.release_lock();

    assert!(!lock.is_locked());
    // Not ours to delete.
    assert!(path.exists());
}

#[test]
fn test_acquire_twice_is_noop() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::new(&path);
    lock.acquire_lock(Some("first")).unwrap();
    lock.acquire_lock(Some("second")).unwrap();

    assert!(lock.is_locked());
    assert_eq!(lock.extra_info().as_deref(), Some("first"));
}

#[test]
fn test_second_instance_sees_owner_then_acquires_after_release() {
    let (_temp_dir, path) = lock_dir();
    let engine_a = FileLock::new(&path);
    let engine_b = FileLock::new(&path);

    engine_a.acquire_lock(Some("ownerA")).unwrap();
    assert!(engine_a.is_locked());

    let err = engine_b.acquire_lock(Some("ownerB")).unwrap_err();
    assert!(matches!(err, LockError::AlreadyLocked { .. }));
    assert_eq!(err.extra_info(), Some("ownerA"));
    assert!(!engine_b.is_locked());

    engine_a.release_lock();
    assert!(!engine_a.is_locked());
    assert!(!path.exists());

    engine_b.acquire_lock(Some("ownerB")).unwrap();
    assert!(engine_b.is_locked());
    let meta = LockMetadata::from_file(&path).unwrap().unwrap();
    assert_eq!(meta.extra_info.as_deref(), Some("ownerB"));
}

#[test]
fn test_token_round_trip() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::with_token(&path, "T1");
    lock.acquire_lock(Some("alice")).unwrap();

    let meta = LockMetadata::from_file(&path).unwrap().unwrap();
    assert_eq!(meta.token, "T1");
    assert_eq!(meta.host_name, "");
    assert_eq!(meta.port, 0);
    assert!(!meta.has_listener());
}

#[test]
fn test_default_token_is_stable() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::new(&path);
    let token = lock.token().to_string();
    assert!(!token.is_empty());
    assert!(token.parse::<i64>().is_ok());

    lock.acquire_lock(None).unwrap();
    assert_eq!(lock.token(), token);
    lock.assert_lock().unwrap();
    assert_eq!(lock.token(), token);

    let meta = LockMetadata::from_file(&path).unwrap().unwrap();
    assert_eq!(meta.token, token);
}

#[test]
fn test_listener_advertises_port() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::new(&path);
    let (_recorder, handler) = handler("ok");
    lock.acquire_lock_with_message(None, handler, Some("alice"))
        .unwrap();

    let port = lock.watcher_port().expect("watcher should be running");
    let meta = LockMetadata::from_file(&path).unwrap().unwrap();
    assert_eq!(meta.port, port);
    assert_eq!(meta.host_name, current_host());
    assert_eq!(meta.token, lock.token());
    assert_eq!(meta.extra_info.as_deref(), Some("alice"));
}

#[test]
fn test_message_reaches_holder() {
    let (_temp_dir, path) = lock_dir();
    let holder = FileLock::new(&path);
    let (recorder, handler) = handler("ok");
    holder
        .acquire_lock_with_message(None, handler, Some("alice"))
        .unwrap();

    let requester = FileLock::new(&path);
    let err = requester
        .acquire_lock_with_message(Some("please release"), None, Some("bob"))
        .unwrap_err();

    match err {
        LockError::SentMessage { response } => assert_eq!(response, "ok"),
        other => panic!("expected SentMessage, got {other:?}"),
    }
    assert_eq!(recorder.received(), vec!["please release".to_string()]);
    assert!(!requester.is_locked());
    assert!(holder.is_locked());
}

#[test]
fn test_no_message_reports_owner_of_listening_holder() {
    let (_temp_dir, path) = lock_dir();
    let holder = FileLock::new(&path);
    let (recorder, handler) = handler("ok");
    holder
        .acquire_lock_with_message(None, handler, Some("alice"))
        .unwrap();

    let requester = FileLock::new(&path);
    let err = requester
        .acquire_lock_with_message(None, None, Some("bob"))
        .unwrap_err();

    assert!(matches!(err, LockError::AlreadyLocked { .. }));
    assert_eq!(err.extra_info(), Some("alice"));
    assert!(recorder.received().is_empty());
}

#[test]
fn test_failing_handler_means_already_locked() {
    let (_temp_dir, path) = lock_dir();
    let holder = FileLock::new(&path);
    let recorder = RecordingHandler::failing();
    holder
        .acquire_lock_with_message(None, Some(recorder.clone()), Some("alice"))
        .unwrap();

    let requester = FileLock::new(&path);
    let err = requester
        .acquire_lock_with_message(Some("activate"), None, None)
        .unwrap_err();

    assert!(matches!(err, LockError::AlreadyLocked { .. }));
    assert_eq!(err.extra_info(), Some("alice"));
    assert_eq!(recorder.received(), vec!["activate".to_string()]);

    // The watcher survives a failing handler.
    let err = requester
        .acquire_lock_with_message(Some("activate"), None, None)
        .unwrap_err();
    assert!(matches!(err, LockError::AlreadyLocked { .. }));
    assert_eq!(recorder.received().len(), 2);
}

#[test]
fn test_deleted_lock_file_is_fatal() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::new(&path);
    lock.acquire_lock(Some("alice")).unwrap();

    std::fs::remove_file(&path).unwrap();

    let err = lock.assert_lock().unwrap_err();
    assert!(matches!(err, LockError::NotLocked { .. }));
    assert!(err.is_fatal());
    assert!(!lock.is_locked());
}

#[test]
fn test_unreachable_directory_is_uncertain_until_restored() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let share = temp_dir.path().join("share");
    let moved = temp_dir.path().join("share-offline");
    std::fs::create_dir(&share).unwrap();
    let path = share.join("lock.dat");

    let lock = FileLock::new(&path);
    lock.acquire_lock(Some("alice")).unwrap();

    std::fs::rename(&share, &moved).unwrap();
    let err = lock.assert_lock().unwrap_err();
    assert!(matches!(err, LockError::Uncertain { .. }));
    assert!(!err.is_fatal());
    assert!(lock.is_locked());

    std::fs::rename(&moved, &share).unwrap();
    lock.assert_lock().unwrap();
    assert!(lock.is_locked());
    assert_eq!(lock.extra_info().as_deref(), Some("alice"));
}

#[test]
fn test_foreign_token_is_already_locked() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::with_token(&path, "MINE");
    lock.acquire_lock(Some("alice")).unwrap();

    std::fs::write(&path, "\n\n0\nTHEIRS\nmallory\n").unwrap();

    let err = lock.assert_lock().unwrap_err();
    assert!(matches!(err, LockError::AlreadyLocked { .. }));
    assert_eq!(err.extra_info(), Some("mallory"));
    assert!(!lock.is_locked());

    // The file now belongs to someone else and must survive our release.
    lock.release_lock();
    assert!(path.exists());
}

#[test]
fn test_unreadable_metadata_is_already_locked() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::new(&path);
    lock.acquire_lock(None).unwrap();

    std::fs::write(&path, "\n").unwrap();

    let err = lock.assert_lock().unwrap_err();
    assert!(matches!(err, LockError::AlreadyLocked { extra_info: None, .. }));
}

#[test]
fn test_corrupt_metadata_is_generic_failure() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::new(&path);
    lock.acquire_lock(None).unwrap();

    std::fs::write(&path, "\nhost\nnot-a-port\n").unwrap();

    let err = lock.assert_lock().unwrap_err();
    assert!(matches!(err, LockError::Failure { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_forced_reassert_keeps_lock() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::with_config(&path, None, fast_config());
    lock.acquire_lock(Some("alice")).unwrap();

    {
        let mut state = lock.inner.state();
        lock.inner.assert_locked(&mut state, true).unwrap();
    }

    assert!(lock.is_locked());
    assert!(is_lock_held(&path).unwrap());
    let other = FileLock::new(&path);
    assert!(matches!(
        other.acquire_lock(None),
        Err(LockError::AlreadyLocked { .. })
    ));
}

#[test]
fn test_assert_claims_existing_hold_by_token() {
    let (_temp_dir, path) = lock_dir();
    let original = FileLock::with_token(&path, "SESSION-7");
    original.acquire_lock(Some("alice")).unwrap();
    original.release_lock_with(false);
    assert!(path.exists());

    let resumed = FileLock::with_token(&path, "SESSION-7");
    resumed.assert_lock().unwrap();
    assert!(resumed.is_locked());
    assert_eq!(resumed.extra_info().as_deref(), Some("alice"));

    let stranger = FileLock::with_token(&path, "OTHER");
    assert!(matches!(
        stranger.assert_lock(),
        Err(LockError::AlreadyLocked { .. })
    ));
}

#[test]
fn test_release_without_delete_keeps_metadata() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::with_token(&path, "T1");
    lock.acquire_lock(Some("alice")).unwrap();
    lock.release_lock_with(false);

    assert!(!lock.is_locked());
    let meta = LockMetadata::from_file(&path).unwrap().unwrap();
    assert_eq!(meta.token, "T1");
    assert_eq!(meta.extra_info.as_deref(), Some("alice"));
}

#[test]
fn test_approver_veto_blocks_acquire() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::new(&path);
    let vetoed = path.clone();
    lock.set_approver(Arc::new(move |_: &Path, _: Option<&str>| -> crate::error::Result<()> {
        Err(LockError::ReadOnly {
            path: vetoed.clone(),
        })
    }));

    let err = lock.acquire_lock(Some("alice")).unwrap_err();
    assert!(matches!(err, LockError::ReadOnly { .. }));
    assert!(!lock.is_locked());
    assert!(!path.exists());

    lock.clear_approver();
    lock.acquire_lock(Some("alice")).unwrap();
    assert!(lock.is_locked());
}

#[test]
fn test_approver_only_consulted_for_new_locks() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::new(&path);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    lock.set_approver(Arc::new(move |_: &Path, extra: Option<&str>| -> crate::error::Result<()> {
        assert_eq!(extra, Some("alice"));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    lock.acquire_lock(Some("alice")).unwrap();
    lock.assert_lock().unwrap();
    lock.assert_lock().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_directory_cannot_create() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("no-such-dir").join("lock.dat");
    let lock = FileLock::new(&path);

    let err = lock.acquire_lock(None).unwrap_err();
    assert!(matches!(err, LockError::CannotCreate { source: Some(_) }));
    assert!(!lock.is_locked());
}

#[test]
fn test_truncated_lock_file_cannot_create() {
    let (_temp_dir, path) = lock_dir();
    let holder = FileLock::new(&path);
    holder.acquire_lock(None).unwrap();
    std::fs::write(&path, "").unwrap();

    let err = FileLock::new(&path).acquire_lock(None).unwrap_err();
    assert!(matches!(err, LockError::CannotCreate { source: None }));
}

#[test]
fn test_drop_releases_lock() {
    let (_temp_dir, path) = lock_dir();
    {
        let lock = FileLock::new(&path);
        lock.acquire_lock(None).unwrap();
        assert!(path.exists());
    }
    assert!(!path.exists());
    FileLock::new(&path).acquire_lock(None).unwrap();
}

#[test]
fn test_exit_hook_registered_while_locked() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::new(&path);
    lock.acquire_lock(None).unwrap();

    let id = lock
        .inner
        .state()
        .exit_hook_id()
        .expect("locked instance should register an exit hook");
    assert!(exit_hooks::ExitHooks::global().is_registered(id));

    lock.release_lock();
    assert!(!exit_hooks::ExitHooks::global().is_registered(id));
    assert!(lock.inner.state().exit_hook_id().is_none());
}

#[test]
fn test_release_stops_watcher() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::with_config(&path, None, fast_config());
    let (_recorder, handler) = handler("ok");
    lock.acquire_lock_with_message(None, handler, None).unwrap();
    let port = lock.watcher_port().unwrap();

    lock.release_lock();

    assert_eq!(lock.watcher_port(), None);
    assert!(TcpStream::connect((Ipv4Addr::LOCALHOST, port)).is_err());
}

#[test]
fn test_handler_may_release_from_watcher_thread() {
    let (_temp_dir, path) = lock_dir();
    let holder = Arc::new(FileLock::with_config(&path, None, fast_config()));
    let weak = Arc::downgrade(&holder);
    let handler: Arc<dyn LockMessageHandler> =
        Arc::new(move |msg: &LockMessage| -> Result<String, HandlerError> {
            if msg.message() == "yield" {
                if let Some(holder) = weak.upgrade() {
                    holder.release_lock();
                }
                return Ok("released".to_string());
            }
            Ok("kept".to_string())
        });
    holder
        .acquire_lock_with_message(None, Some(handler), Some("alice"))
        .unwrap();

    let requester = FileLock::new(&path);
    let err = requester
        .acquire_lock_with_message(Some("yield"), None, Some("bob"))
        .unwrap_err();
    assert_eq!(err.response(), Some("released"));
    assert!(!holder.is_locked());

    requester.acquire_lock(Some("bob")).unwrap();
    assert!(requester.is_locked());
}

#[test]
#[serial]
fn test_watcher_reports_lost_lock_once() {
    let (_temp_dir, path) = lock_dir();
    let lock = FileLock::with_config(&path, None, fast_config());
    let (recorder, handler) = handler("ok");
    lock.acquire_lock_with_message(None, handler, Some("alice"))
        .unwrap();

    std::fs::remove_file(&path).unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        recorder.received().iter().any(|m| m == LOCK_LOST_MESSAGE)
    }));
    assert!(!lock.is_locked());

    // Checks are disabled after the loss; no second notice arrives.
    thread::sleep(Duration::from_millis(2500));
    let lost = recorder
        .received()
        .iter()
        .filter(|m| m.as_str() == LOCK_LOST_MESSAGE)
        .count();
    assert_eq!(lost, 1);
}

#[test]
#[serial]
fn test_watcher_checks_can_be_disabled() {
    let (_temp_dir, path) = lock_dir();
    let config = crate::config::LockConfig {
        listen_for_lost_lock: false,
        ..fast_config()
    };
    let lock = FileLock::with_config(&path, None, config);
    assert!(!lock.listen_for_lost_lock());
    let (recorder, handler) = handler("ok");
    lock.acquire_lock_with_message(None, handler, None).unwrap();

    std::fs::remove_file(&path).unwrap();
    thread::sleep(Duration::from_millis(2500));

    assert!(recorder.received().is_empty());
    // Nobody asserted, so the instance still believes it holds the lock.
    assert!(lock.is_locked());
}

#[test]
#[serial]
fn test_watcher_survives_temporary_directory_loss() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let share = temp_dir.path().join("share");
    let moved = temp_dir.path().join("share-offline");
    std::fs::create_dir(&share).unwrap();
    let path = share.join("lock.dat");

    let lock = FileLock::with_config(&path, None, fast_config());
    let (recorder, handler) = handler("ok");
    lock.acquire_lock_with_message(None, handler, Some("alice"))
        .unwrap();

    std::fs::rename(&share, &moved).unwrap();
    thread::sleep(Duration::from_millis(1500));
    std::fs::rename(&moved, &share).unwrap();
    thread::sleep(Duration::from_millis(2500));

    assert!(recorder.received().is_empty());
    assert!(lock.is_locked());
    lock.assert_lock().unwrap();
}

#[test]
fn test_handle_opened_before_release_cannot_take_lock() {
    let (_temp_dir, path) = lock_dir();
    let holder = FileLock::new(&path);
    holder.acquire_lock(Some("alice")).unwrap();

    // A contender opened the file just before the holder let go.
    let early = native::open_lock_file(&path).unwrap();
    holder.release_lock();
    assert!(matches!(
        native::NativeLock::try_acquire(early, &path).unwrap(),
        native::TryLock::Stale
    ));

    let next = FileLock::new(&path);
    next.acquire_lock(Some("bob")).unwrap();
    assert!(next.is_locked());
    assert!(is_lock_held(&path).unwrap());
    assert!(matches!(
        FileLock::new(&path).acquire_lock(None),
        Err(LockError::AlreadyLocked { .. })
    ));
}

#[test]
fn test_zero_intervals_do_not_stall_watcher() {
    let (_temp_dir, path) = lock_dir();
    let config = crate::config::LockConfig {
        check_interval_secs: 0,
        uncertain_check_interval_secs: 0,
        accept_poll_ms: 0,
        message_timeout_ms: 2000,
        reassert_delay_ms: 0,
        listen_for_lost_lock: true,
    };
    let holder = FileLock::with_config(&path, None, config);
    let (recorder, handler) = handler("ok");
    holder
        .acquire_lock_with_message(None, handler, Some("alice"))
        .unwrap();

    let err = FileLock::new(&path)
        .acquire_lock_with_message(Some("ping"), None, None)
        .unwrap_err();
    assert_eq!(err.response(), Some("ok"));
    assert_eq!(recorder.received(), vec!["ping".to_string()]);

    holder.release_lock();
    assert!(!path.exists());
}

#[test]
fn test_non_utf8_message_is_decoded_lossily() {
    use std::io::{BufRead, BufReader, Write};

    let (_temp_dir, path) = lock_dir();
    let holder = FileLock::with_token(&path, "T1");
    let (recorder, handler) = handler("ok");
    holder.acquire_lock_with_message(None, handler, None).unwrap();
    let port = holder.watcher_port().unwrap();

    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
    stream.write_all(b"caf\xe9 open\n").unwrap();
    let mut reader = BufReader::new(stream);
    let mut token = String::new();
    reader.read_line(&mut token).unwrap();
    let mut reply = String::new();
    reader.read_line(&mut reply).unwrap();

    assert_eq!(token.trim_end(), "T1");
    assert_eq!(reply.trim_end(), "ok");
    assert_eq!(recorder.received(), vec!["caf\u{FFFD} open".to_string()]);
}
