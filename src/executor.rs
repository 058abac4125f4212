//! Asynchronous execution of external commands

use crate::errors::{GfxSwitchError, Result};
use futures_util::future::BoxFuture;
use log::debug;
use std::fmt;
use tokio::process::Command;

/// Program plus argument vector, run without a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of one command run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }
}

/// Runs external commands without blocking the event loop.
///
/// A spawn failure is reported as `Err`; a command that ran but exited
/// non-zero is reported as `Ok` with `success == false`.
pub trait CommandExecutor: Send + Sync {
    fn run<'a>(&'a self, command: &'a CommandLine) -> BoxFuture<'a, Result<CommandOutput>>;
}

/// Executor backed by `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for SystemExecutor {
    fn run<'a>(&'a self, command: &'a CommandLine) -> BoxFuture<'a, Result<CommandOutput>> {
        Box::pin(async move {
            debug!("Running: {}", command);
            let output = Command::new(command.program())
                .args(command.arguments())
                .output()
                .await
                .map_err(|e| GfxSwitchError::CommandFailed {
                    command: command.to_string(),
                    stderr: e.to_string(),
                })?;

            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                success: output.status.success(),
            })
        })
    }
}
