//! Fake system for testing the updater without touching real devices.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use xscript::Cmd;

use fruit_common::command::{argv, CommandError, CommandOutput, Executor};
use fruit_common::mounts::MountTable;

use crate::config::UpdateConfig;

/// Exit code of failing commands, the code `mount` uses for mount failures.
const FAILURE_CODE: i32 = 32;

/// Temporary directory with a configuration pointing into it.
///
/// The simulated mount table initially has `/dev/p2` mounted as active root partition.
pub struct Fixture {
    dir: TempDir,
    pub config: UpdateConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path();
        for sub_dir in ["flags", "output", "run"] {
            fs::create_dir(path.join(sub_dir)).unwrap();
        }
        let config = UpdateConfig {
            devices: ["/dev/p2".into(), "/dev/p3".into()],
            flag_dir: path.join("flags"),
            backup_dir: path.join("root-backup"),
            reboot_marker: path.join("run/fruit_update.reboot"),
            mount_table: path.join("mounts"),
            output_dir: Some(path.join("output")),
            ..UpdateConfig::default()
        };
        let fixture = Self { dir, config };
        fixture.set_mount_table("/dev/p2 /media/root-ro ext4 ro,relatime 0 0\n");
        fixture
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Fake executor operating on the mount table of the fixture.
    pub fn executor(&self) -> FakeExecutor {
        FakeExecutor::new(&self.config.mount_table)
    }

    pub fn mount_table(&self) -> MountTable {
        MountTable::read(&self.config.mount_table).unwrap()
    }

    pub fn set_mount_table(&self, table: &str) {
        fs::write(&self.config.mount_table, table).unwrap();
    }
}

type FailurePredicate = Box<dyn Fn(&[String]) -> bool>;

/// Executor recording commands and simulating `mount`, `umount`, and `apk`.
///
/// Mounts and unmounts are applied to a mount table file.
pub struct FakeExecutor {
    mount_table: PathBuf,
    upgrade_output: String,
    fail: FailurePredicate,
    commands: RefCell<Vec<Vec<String>>>,
}

impl FakeExecutor {
    pub fn new(mount_table: &Path) -> Self {
        Self {
            mount_table: mount_table.to_owned(),
            upgrade_output: "OK: 12 MiB in 30 packages\n".to_owned(),
            fail: Box::new(|_| false),
            commands: RefCell::default(),
        }
    }

    /// Simulate an upgrade of the given number of packages.
    pub fn with_upgraded(self, upgraded: usize) -> Self {
        let mut output = (1..=upgraded)
            .map(|idx| format!("({idx}/{upgraded}) Upgrading pkg-{idx} (1.0-r0 -> 1.0-r1)\n"))
            .collect::<String>();
        output.push_str(&self.upgrade_output);
        Self {
            upgrade_output: output,
            ..self
        }
    }

    /// Fail all commands matching the predicate.
    pub fn fail_when(self, predicate: impl Fn(&[String]) -> bool + 'static) -> Self {
        Self {
            fail: Box::new(predicate),
            ..self
        }
    }

    /// Executed commands.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.borrow().clone()
    }

    /// Executed commands as command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.commands().iter().map(|argv| argv.join(" ")).collect()
    }

    /// Index of the first command starting with the given arguments.
    pub fn position(&self, prefix: &[&str]) -> Option<usize> {
        self.commands().iter().position(|argv| starts_with(argv, prefix))
    }

    /// Index of the last command starting with the given arguments.
    pub fn rposition(&self, prefix: &[&str]) -> Option<usize> {
        self.commands().iter().rposition(|argv| starts_with(argv, prefix))
    }

    fn update_table(&self, update: impl FnOnce(&mut Vec<String>) -> bool) -> bool {
        let table = fs::read_to_string(&self.mount_table).unwrap_or_default();
        let mut lines = table.lines().map(str::to_owned).collect::<Vec<_>>();
        let updated = update(&mut lines);
        if updated {
            let mut table = lines.join("\n");
            table.push('\n');
            fs::write(&self.mount_table, table).unwrap();
        }
        updated
    }

    fn mount(&self, args: &[String]) -> CommandOutput {
        let entry = match args {
            [flag, options, _] if flag == "-o" && options.starts_with("remount,") => None,
            [flag, fs_type, source, target] if flag == "-t" => {
                Some(format!("{source} {target} {fs_type} rw 0 0"))
            }
            [flag, source, target] if flag == "--bind" => {
                Some(format!("{source} {target} none rw,bind 0 0"))
            }
            [device, target] => Some(format!("{device} {target} ext4 rw 0 0")),
            _ => panic!("unexpected mount arguments {args:?}"),
        };
        if let Some(entry) = entry {
            self.update_table(|lines| {
                lines.push(entry);
                true
            });
        }
        CommandOutput::empty()
    }

    fn umount(&self, args: &[String]) -> CommandOutput {
        let [flag, target] = args else {
            panic!("unexpected umount arguments {args:?}");
        };
        assert_eq!(flag, "-f");
        let unmounted = self.update_table(|lines| {
            let mounted = lines.iter().rposition(|line| {
                MountTable::parse(line)
                    .entries()
                    .first()
                    .is_some_and(|entry| entry.mount_point == Path::new(target))
            });
            mounted.map(|idx| lines.remove(idx)).is_some()
        });
        if unmounted {
            CommandOutput::empty()
        } else {
            CommandOutput {
                code: Some(FAILURE_CODE),
                stdout: String::new(),
                stderr: format!("umount: {target}: not mounted.\n"),
            }
        }
    }
}

fn starts_with(argv: &[String], prefix: &[&str]) -> bool {
    argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(arg, expected)| arg == expected)
}

impl Executor for FakeExecutor {
    fn execute(&self, cmd: &Cmd<OsString>) -> Result<CommandOutput, CommandError> {
        let argv = argv(cmd);
        self.commands.borrow_mut().push(argv.clone());
        if (self.fail)(&argv) {
            return Ok(CommandOutput {
                code: Some(FAILURE_CODE),
                stdout: String::new(),
                stderr: format!("{}: simulated failure\n", argv[0]),
            });
        }
        Ok(match argv[0].as_str() {
            "mount" => self.mount(&argv[1..]),
            "umount" => self.umount(&argv[1..]),
            _ if argv.last().is_some_and(|arg| arg == "upgrade") => CommandOutput {
                stdout: self.upgrade_output.clone(),
                ..CommandOutput::empty()
            },
            _ => CommandOutput::empty(),
        })
    }
}
