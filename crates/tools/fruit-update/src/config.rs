//! Configuration of the updater.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fruit_common::mounts::PROC_MOUNTS;

/// Path of the updater configuration file.
pub const UPDATE_CONFIG_PATH: &str = "/etc/fruit/update.toml";

/// Error loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse configuration file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Structure of the updater configuration file.
///
/// All keys are optional, the defaults match the layout of Fruit devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct UpdateConfig {
    /// The two root partitions, the first one is assumed active if detection fails.
    pub devices: [PathBuf; 2],
    /// Mount point of the active root partition.
    pub root_ro_mount_point: PathBuf,
    /// Directory of the dirty flags, the mount point of the boot partition.
    pub flag_dir: PathBuf,
    /// Indicates whether the flag partition is mounted read-only.
    ///
    /// If set, the partition is remounted writable for every modification.
    pub flag_partition_protected: bool,
    /// Directory where the non-active root partition is mounted for upgrading.
    pub backup_dir: PathBuf,
    /// File requesting a reboot into the upgraded partition.
    pub reboot_marker: PathBuf,
    /// Mount table of the running system.
    pub mount_table: PathBuf,
    /// The `apk` executable.
    pub apk: PathBuf,
    /// Maximal number of seconds `apk` waits for the package database lock.
    pub upgrade_wait_secs: u64,
    /// Directory for the output of `apk` (defaults to the temporary directory).
    pub output_dir: Option<PathBuf>,
    /// Block size used for cloning partitions.
    pub clone_block_size: String,
    /// Fail instead of guessing when the active root partition cannot be determined.
    pub strict_role_detection: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            devices: ["/dev/mmcblk0p2".into(), "/dev/mmcblk0p3".into()],
            root_ro_mount_point: "/media/root-ro".into(),
            flag_dir: "/media/mmcblk0p1".into(),
            flag_partition_protected: true,
            backup_dir: "/media/root-backup".into(),
            reboot_marker: "/run/fruit_update.reboot".into(),
            mount_table: PROC_MOUNTS.into(),
            apk: "apk".into(),
            upgrade_wait_secs: 1200,
            output_dir: None,
            clone_block_size: "4M".to_owned(),
            strict_role_detection: false,
        }
    }
}

impl UpdateConfig {
    /// Directory for the output of `apk`.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Load the configuration falling back to the defaults if the file does not exist.
pub fn load_update_config(path: &Path) -> Result<UpdateConfig, ConfigError> {
    Ok(if path.exists() {
        let config = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&config).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?
    } else {
        UpdateConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_from_toml() {
        let config = toml::from_str::<UpdateConfig>(indoc! {r#"
            devices = ["/dev/sda2", "/dev/sda3"]
            root-ro-mount-point = "/run/root-ro"
            flag-dir = "/boot"
            flag-partition-protected = false
            backup-dir = "/run/root-backup"
            reboot-marker = "/run/reboot"
            apk = "/sbin/apk"
            upgrade-wait-secs = 60
            output-dir = "/var/log/fruit"
            clone-block-size = "1M"
            strict-role-detection = true
        "#})
        .unwrap();
        assert_eq!(config.devices[1], Path::new("/dev/sda3"));
        assert_eq!(config.flag_dir, Path::new("/boot"));
        assert!(!config.flag_partition_protected);
        assert_eq!(config.upgrade_wait_secs, 60);
        assert_eq!(config.output_dir(), Path::new("/var/log/fruit"));
        assert_eq!(config.mount_table, Path::new(PROC_MOUNTS));
        assert!(config.strict_role_detection);
    }

    #[test]
    fn test_defaults() {
        let config = toml::from_str::<UpdateConfig>("backup-dir = \"/mnt\"").unwrap();
        assert_eq!(
            config,
            UpdateConfig {
                backup_dir: "/mnt".into(),
                ..UpdateConfig::default()
            }
        );
        assert_eq!(config.devices[0], Path::new("/dev/mmcblk0p2"));
        assert_eq!(config.upgrade_wait_secs, 1200);
    }

    #[test]
    fn test_load_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update.toml");
        assert_eq!(load_update_config(&path).unwrap(), UpdateConfig::default());
        fs::write(&path, "devices = 5").unwrap();
        assert!(matches!(
            load_update_config(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
