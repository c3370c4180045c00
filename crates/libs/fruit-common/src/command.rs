//! Synchronous execution of external commands with structured results.

use std::ffi::OsString;
use std::io;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;
use xscript::Cmd;

/// Output of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code of the process (`None` if it has been terminated by a signal).
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a command which exited with code zero and printed nothing.
    pub fn empty() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }

    /// Indicates whether the command exited with code zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Error executing a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unable to run `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` failed with {}{}", exit_status(.code), stderr_suffix(.stderr))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_owned(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Program and arguments of a command as lossy strings.
pub fn argv(cmd: &Cmd<OsString>) -> Vec<String> {
    let mut argv = vec![cmd.prog().to_string_lossy().into_owned()];
    argv.extend(
        cmd.args()
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned()),
    );
    argv
}

/// Human-readable command line of a command.
pub fn command_line(cmd: &Cmd<OsString>) -> String {
    argv(cmd).join(" ")
}

/// Executes external commands.
///
/// Every interaction of Fruit tools with external programs goes through this trait, which
/// allows replacing the system with a recording fake in tests.
pub trait Executor {
    /// Run the command to completion and capture its output.
    ///
    /// Fails only if the process could not be run at all, a non-zero exit code is
    /// reported through [`CommandOutput::code`].
    fn execute(&self, cmd: &Cmd<OsString>) -> Result<CommandOutput, CommandError>;

    /// Run the command and fail if it does not exit with code zero.
    fn execute_checked(&self, cmd: &Cmd<OsString>) -> Result<CommandOutput, CommandError> {
        let output = self.execute(cmd)?;
        if !output.success() {
            return Err(CommandError::Failed {
                command: command_line(cmd),
                code: output.code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

/// Executor running commands as child processes of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn execute(&self, cmd: &Cmd<OsString>) -> Result<CommandOutput, CommandError> {
        debug!("running `{}`", command_line(cmd));
        let output = Command::new(cmd.prog())
            .args(cmd.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| CommandError::Spawn {
                command: command_line(cmd),
                source,
            })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
