//! Upgrading the non-active root partition.
//!
//! An update proceeds in the following steps:
//!
//! 1. Determine the active and non-active root partitions.
//! 2. Unmount any leftovers of a previous, interrupted update.
//! 3. If the non-active partition is dirty, restore it by cloning the active partition.
//! 4. Mark the non-active partition dirty.
//! 5. Mount the non-active partition as backup view.
//! 6. Upgrade the packages in the backup view.
//! 7. Unmount the backup view and mark the non-active partition clean.
//! 8. Request a reboot, if any packages have been upgraded.
//!
//! If any step fails, the backup view is unmounted on a best-effort basis. The dirty flag
//! of a partition which failed between step 4 and 7 stays set, so that the next update
//! restores the partition.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use fruit_cli::{error, info, warn};
use fruit_common::command::Executor;

use crate::config::UpdateConfig;
use crate::reboot::{RebootRequest, RebootRequestError};
use crate::system::backup::{BackupMount, MountError};
use crate::system::clone::{CloneError, PartitionCloner};
use crate::system::flags::{DirtyFlags, FlagError};
use crate::system::partitions::{resolve, ResolveError, RootPartitions};
use crate::system::upgrade::{PackageManager, UpgradeError};

/// Step of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStep {
    Resolving,
    Unmounting,
    RecoveringClone,
    MarkingDirty,
    Mounting,
    Upgrading,
    UnmountingAfterUpgrade,
    MarkingClean,
    RequestingReboot,
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateStep::Resolving => "resolving root partitions",
            UpdateStep::Unmounting => "unmounting leftovers",
            UpdateStep::RecoveringClone => "recovering dirty partition",
            UpdateStep::MarkingDirty => "marking partition dirty",
            UpdateStep::Mounting => "mounting backup view",
            UpdateStep::Upgrading => "upgrading packages",
            UpdateStep::UnmountingAfterUpgrade => "unmounting backup view",
            UpdateStep::MarkingClean => "marking partition clean",
            UpdateStep::RequestingReboot => "requesting reboot",
        })
    }
}

/// Error of a single update step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error(transparent)]
    Flag(#[from] FlagError),
    #[error(transparent)]
    Clone(#[from] CloneError),
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
    #[error(transparent)]
    RebootRequest(#[from] RebootRequestError),
}

/// Error updating the non-active root partition.
#[derive(Debug, Error)]
#[error("failed updating {} while {step}", display_device(.device))]
pub struct UpdateError {
    /// Partition being updated, if it has been determined.
    pub device: Option<PathBuf>,
    /// Step which failed.
    pub step: UpdateStep,
    #[source]
    pub source: StepError,
}

fn display_device(device: &Option<PathBuf>) -> String {
    match device {
        Some(device) => format!("{device:?}"),
        None => "non-active root partition".to_owned(),
    }
}

/// Attach the step to an error.
fn at<E: Into<StepError>>(step: UpdateStep) -> impl FnOnce(E) -> (UpdateStep, StepError) {
    move |error| (step, error.into())
}

/// Outcome of a successful update.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub partitions: RootPartitions,
    /// Indicates whether the non-active partition had to be recovered.
    pub recovered: bool,
    /// Number of upgraded packages.
    pub upgraded: usize,
    pub reboot_request: Option<RebootRequest>,
}

/// Updates the non-active root partition.
pub struct Updater<'a> {
    config: &'a UpdateConfig,
    executor: &'a dyn Executor,
    package_manager: &'a dyn PackageManager,
}

impl<'a> Updater<'a> {
    pub fn new(
        config: &'a UpdateConfig,
        executor: &'a dyn Executor,
        package_manager: &'a dyn PackageManager,
    ) -> Self {
        Self {
            config,
            executor,
            package_manager,
        }
    }

    /// Upgrade the packages of the non-active root partition.
    ///
    /// Failures are logged and returned as [`UpdateError`].
    pub fn update(&self) -> anyhow::Result<UpdateOutcome> {
        let backup = BackupMount::new(self.config, self.executor);
        let mut device = None;
        self.try_update(&backup, &mut device)
            .map_err(|(step, source)| {
                let error = anyhow::Error::new(UpdateError {
                    device,
                    step,
                    source,
                });
                error!("{error:#}");
                if let Err(cleanup_error) = backup.unmount() {
                    warn!(
                        "unable to clean up after failed update: {:#}",
                        anyhow::Error::new(cleanup_error)
                    );
                }
                error
            })
    }

    fn try_update(
        &self,
        backup: &BackupMount<'_>,
        device: &mut Option<PathBuf>,
    ) -> Result<UpdateOutcome, (UpdateStep, StepError)> {
        let partitions = resolve(self.config).map_err(at(UpdateStep::Resolving))?;
        let RootPartitions { active, non_active } = &partitions;
        *device = Some(non_active.clone());
        info!(
            "updating {non_active:?} with {} (active: {active:?})",
            self.package_manager.name()
        );

        backup.unmount().map_err(at(UpdateStep::Unmounting))?;

        let flags = DirtyFlags::new(self.config, self.executor);
        let recovered = flags.is_dirty(non_active);
        if recovered {
            warn!("recovering dirty (non-active) root partition {non_active:?}");
            PartitionCloner::new(self.config, self.executor)
                .clone_partition(active, non_active)
                .map_err(at(UpdateStep::RecoveringClone))?;
        }

        flags
            .mark_dirty(non_active)
            .map_err(at(UpdateStep::MarkingDirty))?;
        backup
            .mount(non_active)
            .map_err(at(UpdateStep::Mounting))?;
        let upgraded = self
            .package_manager
            .upgrade(backup.dir())
            .map_err(at(UpdateStep::Upgrading))?;
        backup
            .unmount()
            .map_err(at(UpdateStep::UnmountingAfterUpgrade))?;
        flags
            .mark_clean(non_active)
            .map_err(at(UpdateStep::MarkingClean))?;

        let reboot_request = if upgraded > 0 {
            let request = RebootRequest::now(upgraded);
            request
                .write(&self.config.reboot_marker)
                .map_err(at(UpdateStep::RequestingReboot))?;
            info!("requested reboot after upgrading {upgraded} packages");
            Some(request)
        } else {
            info!("no packages upgraded");
            None
        };

        Ok(UpdateOutcome {
            partitions,
            recovered,
            upgraded,
            reboot_request,
        })
    }
}
