//! Raw block-level cloning of root partitions.

use std::path::{Path, PathBuf};

use thiserror::Error;
use xscript::cmd;

use fruit_cli::info;
use fruit_common::command::{CommandError, Executor};

use crate::config::UpdateConfig;

/// The `dd` executable.
const DD: &str = "dd";

/// Error cloning a partition.
#[derive(Debug, Error)]
#[error("unable to clone {from:?} onto {to:?}")]
pub struct CloneError {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: CommandError,
}

/// Clones root partitions with `dd`.
pub struct PartitionCloner<'e> {
    block_size: String,
    executor: &'e dyn Executor,
}

impl<'e> PartitionCloner<'e> {
    pub fn new(config: &UpdateConfig, executor: &'e dyn Executor) -> Self {
        Self {
            block_size: config.clone_block_size.clone(),
            executor,
        }
    }

    /// Overwrite `to` with a byte-for-byte copy of `from`.
    pub fn clone_partition(&self, from: &Path, to: &Path) -> Result<(), CloneError> {
        info!("cloning {from:?} onto {to:?}");
        let input = format!("if={}", from.display());
        let output = format!("of={}", to.display());
        let block_size = format!("bs={}", self.block_size);
        self.executor
            .execute_checked(&cmd!(DD, &input, &output, &block_size, "conv=fsync"))
            .map_err(|source| CloneError {
                from: from.to_owned(),
                to: to.to_owned(),
                source,
            })?;
        // Make sure that the copy has hit the disk.
        nix::unistd::sync();
        Ok(())
    }
}
