//! Lock metadata structures and utilities.
//!
//! The metadata record lives after byte 0 of the lock file, one field per
//! line. Byte 0 itself is the object of the native lock and is never
//! interpreted as data.

use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

/// Contact and ownership details written by the current lock holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockMetadata {
    /// IP address of the holder's machine (empty when no watcher runs).
    pub host_name: String,

    /// Loopback port of the holder's watcher (0 when no watcher runs).
    pub port: u16,

    /// Token identifying the holding session.
    pub token: String,

    /// Optional human-readable description of the holder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<String>,
}

impl LockMetadata {
    /// Create a metadata record, stripping line breaks from `extra_info`.
    pub fn new(
        host_name: impl Into<String>,
        port: u16,
        token: impl Into<String>,
        extra_info: Option<&str>,
    ) -> Self {
        Self {
            host_name: sanitize_line(&host_name.into()),
            port,
            token: sanitize_line(&token.into()),
            extra_info: normalize_extra_info(extra_info),
        }
    }

    /// Whether the holder advertised a watcher that can receive messages.
    pub fn has_listener(&self) -> bool {
        !self.host_name.is_empty() && self.port != 0
    }

    /// Read the metadata of the lock file at `path` without locking it.
    ///
    /// Returns `Ok(None)` when the file holds no contact information.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Option<Self>> {
        let file = File::open(path.as_ref())?;
        Self::read_from(&file)
    }

    /// Read the metadata through an open handle on the lock file.
    pub(crate) fn read_from(file: &File) -> io::Result<Option<Self>> {
        let mut file = file;
        file.seek(SeekFrom::Start(1))?;
        Self::parse(BufReader::new(file))
    }

    fn parse<R: BufRead>(mut reader: R) -> io::Result<Option<Self>> {
        let Some(host_name) = read_line(&mut reader)? else {
            // Written by a holder that never recorded contact details.
            return Ok(None);
        };

        let port_line = read_line(&mut reader)?
            .ok_or_else(|| invalid_data("lock metadata is missing the port"))?;
        let port = port_line
            .trim()
            .parse::<u16>()
            .map_err(|e| invalid_data(&format!("invalid lock port '{}': {}", port_line, e)))?;

        let token = read_line(&mut reader)?
            .ok_or_else(|| invalid_data("lock metadata is missing the token"))?;
        let extra_info = read_line(&mut reader)?;

        Ok(Some(Self {
            host_name,
            port,
            token,
            extra_info: extra_info.filter(|info| !info.is_empty()),
        }))
    }

    /// Render the full file contents, including the reserved first byte.
    fn to_text(&self) -> String {
        let mut text = format!("\n{}\n{}\n{}\n", self.host_name, self.port, self.token);
        if let Some(info) = &self.extra_info {
            text.push_str(info);
            text.push('\n');
        }
        text
    }

    /// Replace the lock file contents with this record.
    ///
    /// Must only be called while the native lock is held through `file`.
    /// The handle is left open: closing it would give up the lock.
    pub(crate) fn write_to(&self, file: &File) -> io::Result<()> {
        let text = self.to_text();
        let mut file = file;
        // Overwrite in place and trim the tail afterwards, so readers never
        // see an empty file.
        file.seek(SeekFrom::Start(0))?;
        file.write_all(text.as_bytes())?;
        file.set_len(text.len() as u64)?;
        file.flush()?;
        file.sync_all()
    }
}

/// Read one line, without its terminator. `Ok(None)` at end of input.
///
/// Invalid UTF-8 is replaced rather than rejected.
pub(crate) fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut bytes = Vec::new();
    if reader.read_until(b'\n', &mut bytes)? == 0 {
        return Ok(None);
    }
    let mut line = String::from_utf8_lossy(&bytes).into_owned();
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Replace CR and LF so a value always fits on a single line.
pub(crate) fn sanitize_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

pub(crate) fn normalize_extra_info(extra_info: Option<&str>) -> Option<String> {
    extra_info
        .filter(|info| !info.is_empty())
        .map(sanitize_line)
}

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}
