//! Upgrading the packages of a root filesystem.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use xscript::cmd;

use fruit_cli::{info, warn};
use fruit_common::command::{command_line, CommandError, CommandOutput, Executor};

use crate::config::UpdateConfig;

/// Error upgrading packages.
#[derive(Debug, Error)]
#[error("unable to upgrade packages in {root:?}")]
pub struct UpgradeError {
    root: PathBuf,
    #[source]
    source: CommandError,
}

/// Package manager upgrading the packages of a root filesystem.
pub trait PackageManager {
    /// Name of the package manager.
    fn name(&self) -> &str;

    /// Upgrade all packages in the given root directory.
    ///
    /// Returns the number of upgraded packages.
    fn upgrade(&self, root: &Path) -> Result<usize, UpgradeError>;
}

/// Count the packages upgraded according to the progress output of `apk`.
///
/// `apk` has no machine-readable summary, so this counts the distinct progress lines of
/// the form `(1/3) Upgrading musl (1.2.4-r1 -> 1.2.4-r2)`.
pub fn count_upgraded(output: &str) -> usize {
    output
        .lines()
        .filter(|line| line.contains(" Upgrading "))
        .map(str::trim)
        .collect::<HashSet<_>>()
        .len()
}

/// Alpine's `apk` package manager.
pub struct Apk<'e> {
    program: PathBuf,
    wait_secs: u64,
    output_dir: PathBuf,
    executor: &'e dyn Executor,
}

impl<'e> Apk<'e> {
    pub fn new(config: &UpdateConfig, executor: &'e dyn Executor) -> Self {
        Self {
            program: config.apk.clone(),
            wait_secs: config.upgrade_wait_secs,
            output_dir: config.output_dir(),
            executor,
        }
    }

    /// Keep the output of a step for later inspection.
    fn save_output(&self, step: &str, output: &CommandOutput) {
        for (stream, contents) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            let path = self
                .output_dir
                .join(format!(".fruit_update.apk.{step}.{stream}"));
            if let Err(error) = fs::write(&path, contents) {
                warn!("unable to save output of `apk {step}` to {path:?}: {error}");
            }
        }
    }
}

impl PackageManager for Apk<'_> {
    fn name(&self) -> &str {
        "apk"
    }

    fn upgrade(&self, root: &Path) -> Result<usize, UpgradeError> {
        let update = cmd!(&self.program, "-q", "--root", root, "update");
        match self.executor.execute(&update) {
            Ok(output) => {
                self.save_output("update", &output);
                if !output.success() {
                    warn!(
                        "refreshing the package index failed with {:?}, continuing",
                        output.code
                    );
                }
            }
            Err(error) => warn!("unable to refresh the package index: {error}"),
        }

        let wait_secs = self.wait_secs.to_string();
        let upgrade = cmd!(
            &self.program,
            "--root",
            root,
            "--purge",
            "--wait",
            &wait_secs,
            "upgrade"
        );
        let failed = |source| UpgradeError {
            root: root.to_owned(),
            source,
        };
        let output = self.executor.execute(&upgrade).map_err(failed)?;
        self.save_output("upgrade", &output);
        if !output.success() {
            return Err(failed(CommandError::Failed {
                command: command_line(&upgrade),
                code: output.code,
                stderr: output.stderr,
            }));
        }
        let upgraded = count_upgraded(&output.stdout);
        info!("upgraded {upgraded} packages in {root:?}");
        Ok(upgraded)
    }
}
