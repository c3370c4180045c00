//! Definition of the command line interface (CLI).

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::Value;

use fruit_cli::{info, warn};
use fruit_common::agent_config::AgentConfig;
use fruit_common::command::SystemExecutor;

use crate::config::{load_update_config, UpdateConfig, UPDATE_CONFIG_PATH};
use crate::reboot::RebootRequest;
use crate::system::backup::BackupMount;
use crate::system::flags::DirtyFlags;
use crate::system::partitions::{detect, RootPartitions};
use crate::system::upgrade::Apk;
use crate::update::Updater;

pub fn main() -> anyhow::Result<ExitCode> {
    fruit_cli::init();

    let args = Args::parse();
    match args.command.unwrap_or(Command::Update) {
        Command::Update => {
            let config = load_update_config(&args.config)?;
            return Ok(update(&config));
        }
        Command::Status { json } => {
            let config = load_update_config(&args.config)?;
            let status = status(&config)?;
            eprint!("{status}");
            if json {
                write_json(&status)?;
            }
        }
        Command::Config(ConfigCommand::Get { pointer, default }) => {
            let config = AgentConfig::from_env();
            let default = default
                .map(|value| {
                    serde_json::from_str::<Value>(&value)
                        .with_context(|| format!("invalid default value {value:?}"))
                })
                .transpose()?
                .unwrap_or(Value::Null);
            write_json(config.get_or(&pointer, &default)?)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    serde_json::to_writer(io::stdout(), value).context("unable to write JSON to stdout")?;
    println!();
    Ok(())
}

fn update(config: &UpdateConfig) -> ExitCode {
    let apk = Apk::new(config, &SystemExecutor);
    let Ok(outcome) = Updater::new(config, &SystemExecutor, &apk).update() else {
        // Failures have been logged by the updater.
        return ExitCode::FAILURE;
    };
    if outcome.recovered {
        info!("recovered {:?}", outcome.partitions.non_active);
    }
    match outcome.reboot_request {
        Some(request) => info!(
            "updated {:?}, reboot requested at {:.6}",
            outcome.partitions.non_active, request.timestamp
        ),
        None => info!("{:?} is up to date", outcome.partitions.non_active),
    }
    ExitCode::SUCCESS
}

/// Dirty state of a root partition.
#[derive(Debug, Serialize)]
struct DeviceStatus {
    device: PathBuf,
    dirty: bool,
}

/// Update state of the system.
#[derive(Debug, Serialize)]
struct Status {
    /// Roles of the root partitions.
    partitions: RootPartitions,
    /// Indicates whether the roles have been detected or are a fallback.
    detected: bool,
    devices: Vec<DeviceStatus>,
    backup_mounted: bool,
    reboot_request: Option<RebootRequest>,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guessed = if self.detected { "" } else { " (assumed)" };
        writeln!(f, "Active: {:?}{guessed}", self.partitions.active)?;
        writeln!(f, "Non-Active: {:?}{guessed}", self.partitions.non_active)?;
        for DeviceStatus { device, dirty } in &self.devices {
            writeln!(
                f,
                "Partition {device:?}: {}",
                if *dirty { "dirty" } else { "clean" }
            )?;
        }
        writeln!(
            f,
            "Backup View: {}",
            if self.backup_mounted {
                "mounted"
            } else {
                "unmounted"
            }
        )?;
        match &self.reboot_request {
            Some(request) => writeln!(
                f,
                "Reboot Request: {:.6} ({} packages upgraded)",
                request.timestamp, request.upgraded
            ),
            None => writeln!(f, "Reboot Request: <none>"),
        }
    }
}

fn status(config: &UpdateConfig) -> anyhow::Result<Status> {
    let (partitions, detected) = match detect(config) {
        Ok(partitions) => (partitions, true),
        Err(error) => {
            warn!("unable to determine active root partition: {error}");
            (RootPartitions::fallback(config), false)
        }
    };
    let flags = DirtyFlags::new(config, &SystemExecutor);
    let devices = config
        .devices
        .iter()
        .map(|device| DeviceStatus {
            device: device.clone(),
            dirty: flags.is_dirty(device),
        })
        .collect();
    let backup_mounted = BackupMount::new(config, &SystemExecutor)
        .is_mounted()
        .context("unable to determine whether the backup view is mounted")?;
    Ok(Status {
        partitions,
        detected,
        devices,
        backup_mounted,
        reboot_request: RebootRequest::read(&config.reboot_marker)?,
    })
}

/// Upgrade the packages of the non-active root partition.
#[derive(Debug, Parser)]
#[clap(version, author)]
pub struct Args {
    /// Path of the configuration file.
    #[clap(long, global = true, default_value = UPDATE_CONFIG_PATH)]
    config: PathBuf,
    /// The command (defaults to `update`).
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Upgrade the non-active root partition and request a reboot.
    Update,
    /// Show the roles and states of the root partitions.
    Status {
        /// Output the status as JSON.
        #[clap(long)]
        json: bool,
    },
    /// Inspect the agent configuration.
    #[clap(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Parser)]
pub enum ConfigCommand {
    /// Print the value for a JSON pointer.
    Get {
        /// JSON pointer, e.g., `/update/channel`.
        pointer: String,
        /// JSON value printed if there is no value for the pointer.
        #[clap(long)]
        default: Option<String>,
    },
}
