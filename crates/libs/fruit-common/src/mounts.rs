//! Parsing of the kernel's mount table.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Path of the kernel's mount table.
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Error reading the mount table.
#[derive(Debug, Error)]
#[error("unable to read mount table {path:?}")]
pub struct MountTableError {
    path: PathBuf,
    #[source]
    source: io::Error,
}

/// Entry of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mounted device or source.
    pub device: String,
    /// Mount point.
    pub mount_point: PathBuf,
}

/// Snapshot of the mount table.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Read the mount table from the given path (usually [`PROC_MOUNTS`]).
    pub fn read(path: impl AsRef<Path>) -> Result<Self, MountTableError> {
        let path = path.as_ref();
        fs::read_to_string(path)
            .map(|table| Self::parse(&table))
            .map_err(|source| MountTableError {
                path: path.to_owned(),
                source,
            })
    }

    /// Parse a mount table in the format of `/proc/mounts`.
    pub fn parse(table: &str) -> Self {
        let entries = table
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_ascii_whitespace();
                let device = fields.next()?;
                let mount_point = fields.next()?;
                Some(MountEntry {
                    device: unescape(device),
                    mount_point: PathBuf::from(unescape(mount_point)),
                })
            })
            .collect();
        Self { entries }
    }

    /// Entries of the mount table in mount order.
    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// Device mounted at the given directory.
    ///
    /// If multiple devices are mounted on top of each other, the last one is returned.
    pub fn device_at(&self, dir: impl AsRef<Path>) -> Option<&str> {
        let dir = dir.as_ref();
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.mount_point == dir)
            .map(|entry| entry.device.as_str())
    }

    /// Indicates whether anything is mounted at the given directory.
    pub fn is_mounted(&self, dir: impl AsRef<Path>) -> bool {
        self.device_at(dir).is_some()
    }
}

/// Decode the octal escapes (e.g., `\040` for a space) used by the kernel.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'\\' && idx + 3 < bytes.len() {
            let digits = &bytes[idx + 1..idx + 4];
            if digits.iter().all(|digit| (b'0'..=b'7').contains(digit)) {
                let value = digits
                    .iter()
                    .fold(0u32, |value, digit| value * 8 + u32::from(digit - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    decoded.push(value);
                    idx += 4;
                    continue;
                }
            }
        }
        decoded.push(bytes[idx]);
        idx += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
