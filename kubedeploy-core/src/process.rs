//! External process execution
//!
//! Every tool the pipeline drives (helm, kubectl, tar) goes through a
//! [`CommandRunner`]:
//! - `run` executes a command to completion with inherited stdio
//! - `spawn` starts a long-lived background process the caller terminates
//!
//! Arguments carrying credentials can be marked sensitive so they never show
//! up in logs or error messages.

use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::process::{Child, Command, Stdio};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while executing an external command
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started (missing binary, permissions)
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully
    #[error("'{command}' exited with {}", exit_label(.code))]
    Failed { command: String, code: Option<i32> },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// An external command with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    program: String,
    args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Arg {
    value: OsString,
    sensitive: bool,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends an argument
    pub fn arg(mut self, value: impl AsRef<OsStr>) -> Self {
        self.args.push(Arg {
            value: value.as_ref().to_os_string(),
            sensitive: false,
        });
        self
    }

    /// Appends an argument that is rendered as `<redacted>` when displayed
    pub fn sensitive_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: OsString::from(Into::<String>::into(value)),
            sensitive: true,
        });
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument values, sensitive ones included, decoded lossily
    pub fn args(&self) -> Vec<Cow<'_, str>> {
        self.args.iter().map(|a| a.value.to_string_lossy()).collect()
    }

    /// Value following `flag`, if present
    pub fn flag_value(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .windows(2)
            .find(|pair| pair[0].value == flag)
            .map(|pair| pair[1].value.as_os_str())
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args.iter().map(|a| &a.value));
        command
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.sensitive {
                write!(f, " <redacted>")?;
            } else {
                write!(f, " {}", arg.value.to_string_lossy())?;
            }
        }
        Ok(())
    }
}

/// A process running in the background until terminated
pub trait BackgroundProcess: Send {
    /// Exit status if the process has already exited on its own
    fn exit_status(&mut self) -> Option<String>;

    /// Kills the process and waits for it to exit
    fn terminate(&mut self) -> std::io::Result<()>;
}

/// Executes external commands
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion with inherited stdout/stderr
    fn run(&self, command: &ExternalCommand) -> Result<(), ProcessError>;

    /// Starts a command in the background with inherited stdout/stderr
    fn spawn(&self, command: &ExternalCommand) -> Result<Box<dyn BackgroundProcess>, ProcessError>;
}

/// Runs commands on the local system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ExternalCommand) -> Result<(), ProcessError> {
        info!("Running: {}", command);

        let status = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| ProcessError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ProcessError::Failed {
                command: command.to_string(),
                code: status.code(),
            });
        }

        debug!("Completed: {}", command.program);
        Ok(())
    }

    fn spawn(&self, command: &ExternalCommand) -> Result<Box<dyn BackgroundProcess>, ProcessError> {
        info!("Starting in background: {}", command);

        let child = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        debug!("Background process {} started", child.id());
        Ok(Box::new(ChildProcess { child }))
    }
}

/// Background process backed by a `std::process::Child`
struct ChildProcess {
    child: Child,
}

impl BackgroundProcess for ChildProcess {
    fn exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(status) => status.map(|s| s.to_string()),
            Err(e) => {
                debug!("Failed to poll background process {}: {}", self.child.id(), e);
                None
            }
        }
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        let pid = self.child.id();
        // Killing an already exited child is not an error worth surfacing
        let kill_result = self.child.kill();
        let status = self.child.wait()?;
        debug!("Background process {} exited: {}", pid, status);
        kill_result.or_else(|e| match e.kind() {
            std::io::ErrorKind::InvalidInput => Ok(()),
            _ => Err(e),
        })
    }
}
