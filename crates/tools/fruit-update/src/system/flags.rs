//! Dirty flags marking root partitions which may be in an inconsistent state.
//!
//! A partition is marked dirty before it is modified and marked clean only after all
//! modifications have completed and the partition has been unmounted. A dirty flag found
//! at the start of an update thus means that a previous update has been interrupted.
//!
//! The flags are files on the boot partition, which is usually mounted read-only. Every
//! modification remounts the partition writable and read-only again afterwards.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use xscript::{cmd, Cmd};

use fruit_cli::debug;
use fruit_common::command::{CommandError, Executor};

use super::MOUNT;
use crate::config::UpdateConfig;

/// Error setting or clearing a dirty flag.
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("unable to remount {path:?} read-write")]
    RemountWritable {
        path: PathBuf,
        #[source]
        source: CommandError,
    },
    #[error("unable to remount {path:?} read-only")]
    RemountReadOnly {
        path: PathBuf,
        #[source]
        source: CommandError,
    },
    #[error("unable to create dirty flag {path:?}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to remove dirty flag {path:?}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Partition holding the dirty flags.
struct FlagPartition<'e> {
    /// Path where the partition is mounted.
    path: PathBuf,
    /// Indicates whether the partition is write-protected.
    ///
    /// If set, the partition must be mounted writable prior to any modifications.
    protected: bool,
    executor: &'e dyn Executor,
}

impl FlagPartition<'_> {
    fn remount_cmd(&self, options: &str) -> Cmd<OsString> {
        cmd!(MOUNT, "-o", options, &self.path)
    }

    /// Run the closure while the partition is writable.
    ///
    /// The partition is remounted read-only even if the closure fails.
    fn with_writable<F>(&self, closure: F) -> Result<(), FlagError>
    where
        F: FnOnce() -> Result<(), FlagError>,
    {
        if !self.protected {
            return closure();
        }
        self.executor
            .execute_checked(&self.remount_cmd("remount,rw"))
            .map_err(|source| FlagError::RemountWritable {
                path: self.path.clone(),
                source,
            })?;
        let result = closure();
        let remounted = self
            .executor
            .execute_checked(&self.remount_cmd("remount,ro"))
            .map_err(|source| FlagError::RemountReadOnly {
                path: self.path.clone(),
                source,
            });
        result.and(remounted.map(|_| ()))
    }
}

/// Name of the dirty flag file of a device.
///
/// For instance, the flag of `/dev/mmcblk0p3` is named `.dev.mmcblk0p3.dirty`.
pub fn flag_file_name(device: &Path) -> String {
    format!("{}.dirty", device.to_string_lossy().replace('/', "."))
}

/// Store of the dirty flags.
pub struct DirtyFlags<'e> {
    partition: FlagPartition<'e>,
}

impl<'e> DirtyFlags<'e> {
    pub fn new(config: &UpdateConfig, executor: &'e dyn Executor) -> Self {
        Self {
            partition: FlagPartition {
                path: config.flag_dir.clone(),
                protected: config.flag_partition_protected,
                executor,
            },
        }
    }

    /// Path of the flag file of the given device.
    pub fn flag_path(&self, device: &Path) -> PathBuf {
        self.partition.path.join(flag_file_name(device))
    }

    /// Indicates whether the device is marked dirty.
    pub fn is_dirty(&self, device: &Path) -> bool {
        self.flag_path(device).exists()
    }

    /// Mark the device dirty.
    pub fn mark_dirty(&self, device: &Path) -> Result<(), FlagError> {
        let path = self.flag_path(device);
        debug!("marking {device:?} dirty");
        self.partition.with_writable(|| {
            fs::File::create(&path)
                .map(|_| ())
                .map_err(|source| FlagError::Create {
                    path: path.clone(),
                    source,
                })
        })
    }

    /// Mark the device clean.
    ///
    /// Does nothing, in particular no remounting, if the device is already clean.
    pub fn mark_clean(&self, device: &Path) -> Result<(), FlagError> {
        let path = self.flag_path(device);
        if !path.exists() {
            return Ok(());
        }
        debug!("marking {device:?} clean");
        self.partition
            .with_writable(|| match fs::remove_file(&path) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    Err(FlagError::Remove {
                        path: path.clone(),
                        source: error,
                    })
                }
                _ => Ok(()),
            })
    }
}
