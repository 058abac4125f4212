//! Session logout side effect

use crate::executor::CommandLine;
use log::{error, info, warn};
use tokio::process::Command;

/// Ends the graphical session so a new GPU driver stack can load.
pub trait SessionControl: Send + Sync {
    /// Fire and forget; the outcome is only logged.
    fn request_logout(&self);
}

/// Runs the configured logout command in the background
#[derive(Debug, Clone)]
pub struct CommandSessionControl {
    command: CommandLine,
}

impl CommandSessionControl {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

impl SessionControl for CommandSessionControl {
    fn request_logout(&self) {
        info!("Requesting session logout: {}", self.command);
        // Must be running before this returns, the runtime may exit right after
        let mut child = match Command::new(self.command.program())
            .args(self.command.arguments())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to run `{}`: {}", self.command, e);
                return;
            }
        };

        let command = self.command.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => warn!("`{}` exited with {}", command, status),
                Err(e) => error!("Failed to wait for `{}`: {}", command, e),
            }
        });
    }
}
