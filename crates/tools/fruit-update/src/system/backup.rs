//! Mounting of the non-active root partition as a chroot-like backup view.

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use xscript::cmd;

use fruit_cli::{debug, info};
use fruit_common::command::{CommandError, Executor};
use fruit_common::mounts::{MountTable, MountTableError};

use super::{MOUNT, UMOUNT};
use crate::config::UpdateConfig;

/// Error mounting or unmounting the backup view.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("failed mounting {device:?} at {dir:?}")]
    Mount {
        device: PathBuf,
        dir: PathBuf,
        #[source]
        source: MountCause,
    },
    #[error("failed unmounting {0:?}")]
    StillMounted(PathBuf),
    #[error("unable to check whether {dir:?} is unmounted")]
    Verify {
        dir: PathBuf,
        #[source]
        source: MountTableError,
    },
}

/// Underlying cause of a failed mount.
#[derive(Debug, Error)]
pub enum MountCause {
    #[error("unable to create mount point")]
    CreateDir(#[source] io::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Backup view of a root partition.
pub struct BackupMount<'e> {
    /// Directory where the root partition is mounted.
    dir: PathBuf,
    /// Mount table of the running system.
    mount_table: PathBuf,
    executor: &'e dyn Executor,
}

impl<'e> BackupMount<'e> {
    pub fn new(config: &UpdateConfig, executor: &'e dyn Executor) -> Self {
        Self {
            dir: config.backup_dir.clone(),
            mount_table: config.mount_table.clone(),
            executor,
        }
    }

    /// Directory where the root partition is mounted.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Indicates whether anything is mounted at the backup directory.
    pub fn is_mounted(&self) -> Result<bool, MountTableError> {
        Ok(MountTable::read(&self.mount_table)?.is_mounted(&self.dir))
    }

    /// Mount the device together with `/proc`, `/sys`, and `/dev`.
    ///
    /// Mounts of a failed attempt are not rolled back, use [`BackupMount::unmount`].
    pub fn mount(&self, device: &Path) -> Result<(), MountError> {
        info!("mounting {device:?} at {:?}", self.dir);
        self.try_mount(device).map_err(|source| MountError::Mount {
            device: device.to_owned(),
            dir: self.dir.clone(),
            source,
        })
    }

    fn try_mount(&self, device: &Path) -> Result<(), MountCause> {
        let dir = &self.dir;
        if !dir.exists() {
            DirBuilder::new()
                .mode(0o700)
                .create(dir)
                .map_err(MountCause::CreateDir)?;
        }
        self.executor.execute_checked(&cmd!(MOUNT, device, dir))?;
        self.executor
            .execute_checked(&cmd!(MOUNT, "-t", "proc", "proc", &dir.join("proc")))?;
        self.executor
            .execute_checked(&cmd!(MOUNT, "--bind", "/sys", &dir.join("sys")))?;
        self.executor
            .execute_checked(&cmd!(MOUNT, "--bind", "/dev", &dir.join("dev")))?;
        Ok(())
    }

    /// Forcefully unmount the backup view.
    ///
    /// Targets which are not mounted are skipped, so this is safe to call speculatively.
    /// Fails only if the backup directory is still mounted afterwards.
    pub fn unmount(&self) -> Result<(), MountError> {
        let dir = &self.dir;
        for target in [dir.join("dev"), dir.join("sys"), dir.join("proc"), dir.clone()] {
            match self.executor.execute_checked(&cmd!(UMOUNT, "-f", &target)) {
                Ok(_) => debug!("unmounted {target:?}"),
                Err(error) => debug!("ignoring unmount error: {error}"),
            }
        }
        let still_mounted = self.is_mounted().map_err(|source| MountError::Verify {
            dir: dir.clone(),
            source,
        })?;
        if still_mounted {
            return Err(MountError::StillMounted(dir.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use crate::testing::Fixture;

    use super::*;

    #[test]
    fn test_mount_and_unmount() {
        let fixture = Fixture::new();
        let executor = fixture.executor();
        let backup = BackupMount::new(&fixture.config, &executor);
        let dir = fixture.config.backup_dir.display().to_string();

        backup.mount(Path::new("/dev/p3")).unwrap();
        let mode = std::fs::metadata(backup.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        let table = fixture.mount_table();
        assert_eq!(table.device_at(backup.dir()), Some("/dev/p3"));
        assert_eq!(table.device_at(backup.dir().join("proc")), Some("proc"));
        assert!(backup.is_mounted().unwrap());

        backup.unmount().unwrap();
        assert!(!backup.is_mounted().unwrap());
        assert!(!fixture.mount_table().is_mounted(backup.dir().join("dev")));
        assert_eq!(
            executor.command_lines(),
            [
                format!("mount /dev/p3 {dir}"),
                format!("mount -t proc proc {dir}/proc"),
                format!("mount --bind /sys {dir}/sys"),
                format!("mount --bind /dev {dir}/dev"),
                format!("umount -f {dir}/dev"),
                format!("umount -f {dir}/sys"),
                format!("umount -f {dir}/proc"),
                format!("umount -f {dir}"),
            ]
        );
    }

    #[test]
    fn test_unmount_when_nothing_is_mounted() {
        let fixture = Fixture::new();
        let executor = fixture.executor();
        let backup = BackupMount::new(&fixture.config, &executor);
        backup.unmount().unwrap();
        assert_eq!(executor.command_lines().len(), 4);
    }

    #[test]
    fn test_unmount_failure() {
        let fixture = Fixture::new();
        let dir = fixture.config.backup_dir.display().to_string();
        let executor = fixture
            .executor()
            .fail_when(move |argv| argv[0] == "umount" && argv.last() == Some(&dir));
        let backup = BackupMount::new(&fixture.config, &executor);
        backup.mount(Path::new("/dev/p3")).unwrap();
        let error = backup.unmount().unwrap_err();
        assert!(matches!(error, MountError::StillMounted(_)));
        // The pseudo-filesystems are gone nevertheless.
        assert!(!fixture.mount_table().is_mounted(backup.dir().join("sys")));
    }

    #[test]
    fn test_mount_failure_is_not_rolled_back() {
        let fixture = Fixture::new();
        let executor = fixture
            .executor()
            .fail_when(|argv| argv.iter().any(|arg| arg == "/sys"));
        let backup = BackupMount::new(&fixture.config, &executor);
        let error = backup.mount(Path::new("/dev/p3")).unwrap_err();
        assert!(error.to_string().starts_with("failed mounting \"/dev/p3\" at "));
        let rendered = format!("{:#}", anyhow::Error::new(error));
        assert!(rendered.ends_with("exit code 32: mount: simulated failure"));
        assert!(backup.is_mounted().unwrap());
        // The device bind mount has not been attempted.
        assert_eq!(executor.command_lines().len(), 3);
        backup.unmount().unwrap();
    }
}
