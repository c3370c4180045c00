//! Functionality related to finding the active root partition.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use fruit_cli::warn;
use fruit_common::mounts::{MountTable, MountTableError};

use crate::config::UpdateConfig;

/// Error determining the active root partition.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    MountTable(#[from] MountTableError),
    #[error("nothing is mounted at {0:?}")]
    NotMounted(PathBuf),
    #[error("unknown device {device:?} is mounted at {mount_point:?}")]
    UnknownDevice { device: String, mount_point: PathBuf },
}

/// Roles of the two root partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootPartitions {
    /// Partition the system is running from.
    pub active: PathBuf,
    /// Partition which is updated.
    pub non_active: PathBuf,
}

impl RootPartitions {
    /// Assignment assumed when the active partition cannot be determined.
    pub fn fallback(config: &UpdateConfig) -> Self {
        let [a, b] = &config.devices;
        Self {
            active: a.clone(),
            non_active: b.clone(),
        }
    }
}

/// Determine the roles of the root partitions from the mount table.
pub fn detect(config: &UpdateConfig) -> Result<RootPartitions, ResolveError> {
    let table = MountTable::read(&config.mount_table)?;
    let mount_point = &config.root_ro_mount_point;
    let Some(device) = table.device_at(mount_point) else {
        return Err(ResolveError::NotMounted(mount_point.clone()));
    };
    let [a, b] = &config.devices;
    let device = Path::new(device);
    if device == a {
        Ok(RootPartitions {
            active: a.clone(),
            non_active: b.clone(),
        })
    } else if device == b {
        Ok(RootPartitions {
            active: b.clone(),
            non_active: a.clone(),
        })
    } else {
        Err(ResolveError::UnknownDevice {
            device: device.display().to_string(),
            mount_point: mount_point.clone(),
        })
    }
}

/// Resolve the roles of the root partitions.
///
/// Unless strict detection is configured, this falls back to the first device being the
/// active one if detection fails.
pub fn resolve(config: &UpdateConfig) -> Result<RootPartitions, ResolveError> {
    match detect(config) {
        Ok(partitions) => Ok(partitions),
        Err(error) if !config.strict_role_detection => {
            let partitions = RootPartitions::fallback(config);
            warn!(
                "unable to determine active root partition ({error}), assuming {:?}",
                partitions.active
            );
            Ok(partitions)
        }
        Err(error) => Err(error),
    }
}
