//! Client side of the loopback handoff protocol.
//!
//! A process that fails to take the native lock reads the holder's contact
//! details from the lock file and, when it has something to say, sends one
//! line to the holder's watcher. The watcher answers with two lines: its
//! session token and the handler's reply.

use super::metadata::{LockMetadata, read_line, sanitize_line};
use crate::error::LockError;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// IPv4 address of this machine, as advertised in lock metadata.
///
/// Falls back to the loopback address when the host name cannot be resolved.
pub(crate) fn current_host() -> &'static str {
    static CURRENT_HOST: OnceLock<String> = OnceLock::new();
    CURRENT_HOST.get_or_init(|| {
        hostname::get()
            .ok()
            .and_then(|name| {
                let name = name.to_string_lossy().to_string();
                (name.as_str(), 0)
                    .to_socket_addrs()
                    .ok()?
                    .find(SocketAddr::is_ipv4)
                    .map(|addr| addr.ip().to_string())
            })
            .unwrap_or_else(|| Ipv4Addr::LOCALHOST.to_string())
    })
}

/// Try to reach the holder of a contended lock.
///
/// Always produces a failure: the lock is not ours. The variant tells the
/// caller how far we got:
/// - `CannotCreate`: there is no lock file worth reading, so the contention
///   is most likely an OS-level problem.
/// - `AlreadyLocked`: the holder is unknown, unreachable, or we had nothing
///   to send.
/// - `SentMessage`: the holder answered; the reply is attached.
pub(crate) fn contact_holder(
    lock_file: &Path,
    contended: &File,
    message: Option<&str>,
    timeout: Duration,
) -> LockError {
    match std::fs::metadata(lock_file) {
        Ok(meta) if meta.len() >= 2 => {}
        _ => return LockError::CannotCreate { source: None },
    }

    let metadata = match LockMetadata::read_from(contended) {
        Ok(Some(metadata)) => metadata,
        Ok(None) => return LockError::already_locked(None),
        Err(e) => {
            return LockError::AlreadyLocked {
                extra_info: None,
                source: Some(e),
            };
        }
    };
    let extra_info = metadata.extra_info.clone();

    let Some(message) = message.filter(|m| !m.is_empty()) else {
        return LockError::already_locked(extra_info);
    };

    if metadata.host_name != current_host() {
        debug!(
            holder = %metadata.host_name,
            "lock holder is on another host, not sending message"
        );
        return LockError::already_locked(extra_info);
    }

    match exchange(metadata.port, message, timeout) {
        Ok((Some(live_token), response)) if live_token == metadata.token => {
            LockError::SentMessage {
                response: response.unwrap_or_default(),
            }
        }
        Ok(_) => {
            debug!("lock holder changed while we were contacting it");
            LockError::already_locked(extra_info)
        }
        Err(e) => {
            debug!(port = metadata.port, error = %e, "could not contact lock holder");
            LockError::AlreadyLocked {
                extra_info,
                source: Some(e),
            }
        }
    }
}

/// Send `message` to the watcher on `port` and read back its token and reply.
fn exchange(
    port: u16,
    message: &str,
    timeout: Duration,
) -> io::Result<(Option<String>, Option<String>)> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut writer = &stream;
    writer.write_all(sanitize_line(message).as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    let mut reader = BufReader::new(&stream);
    let live_token = read_line(&mut reader)?;
    let response = read_line(&mut reader)?;
    Ok((live_token, response))
}
