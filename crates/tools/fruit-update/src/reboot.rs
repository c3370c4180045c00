//! Reboot requests issued after successful upgrades.
//!
//! The request is a single line `<timestamp> <upgraded>` where the timestamp is the Unix
//! time in seconds with microsecond precision. It is consumed by the reboot scheduler.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

/// Error writing or reading a reboot request.
#[derive(Debug, Error)]
pub enum RebootRequestError {
    #[error("unable to write reboot request {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to read reboot request {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid reboot request {0:?}")]
    Invalid(String),
}

/// Request to reboot into the upgraded root partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RebootRequest {
    /// Unix time of the request in seconds.
    pub timestamp: f64,
    /// Number of upgraded packages.
    pub upgraded: usize,
}

impl RebootRequest {
    /// Create a request with the current time.
    ///
    /// The time is truncated to microseconds, the precision of the marker file.
    pub fn now(upgraded: usize) -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        Self {
            timestamp: micros as f64 / 1e6,
            upgraded,
        }
    }

    /// Write the request to the given path replacing any previous request.
    pub fn write(&self, path: &Path) -> Result<(), RebootRequestError> {
        fs::write(path, format!("{self}\n")).map_err(|source| RebootRequestError::Write {
            path: path.to_owned(),
            source,
        })
    }

    /// Read the pending request from the given path, if there is any.
    pub fn read(path: &Path) -> Result<Option<Self>, RebootRequestError> {
        match fs::read_to_string(path) {
            Ok(request) => request.parse().map(Some),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(RebootRequestError::Read {
                path: path.to_owned(),
                source,
            }),
        }
    }
}

impl fmt::Display for RebootRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} {}", self.timestamp, self.upgraded)
    }
}

impl FromStr for RebootRequest {
    type Err = RebootRequestError;

    fn from_str(request: &str) -> Result<Self, Self::Err> {
        let invalid = || RebootRequestError::Invalid(request.to_owned());
        let (timestamp, upgraded) = request.trim().split_once(' ').ok_or_else(invalid)?;
        Ok(Self {
            timestamp: timestamp.parse().map_err(|_| invalid())?,
            upgraded: upgraded.parse().map_err(|_| invalid())?,
        })
    }
}
