//! Configuration for the GPU mode switcher

use crate::errors::{GfxSwitchError, Result};
use crate::executor::CommandLine;
use crate::profile::ProfileId;
use crate::retry::RetryPolicy;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User configuration, stored as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitcherConfig {
    /// Mode switching client, looked up on PATH unless absolute.
    pub tool: String,
    /// Profile assumed when the daemon cannot report a usable one.
    pub default_profile: ProfileId,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Command run after an Integrated <-> Hybrid switch.
    pub logout_command: Vec<String>,
    pub desktop_notifications: bool,
}

impl Default for SwitcherConfig {
    fn default() -> Self {
        Self {
            tool: "supergfxctl".to_string(),
            default_profile: ProfileId::Hybrid,
            max_attempts: 3,
            retry_delay_ms: 1000,
            logout_command: vec!["gnome-session-quit".to_string(), "--logout".to_string()],
            desktop_notifications: true,
        }
    }
}

impl SwitcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    /// `<tool> -s`
    pub fn supported_command(&self) -> CommandLine {
        CommandLine::new(&self.tool).arg("-s")
    }

    /// `<tool> -g`
    pub fn current_command(&self) -> CommandLine {
        CommandLine::new(&self.tool).arg("-g")
    }

    /// `<tool> -m <id>`
    pub fn activation_command(&self, profile: ProfileId) -> CommandLine {
        CommandLine::new(&self.tool).args(profile.descriptor().activation_args.iter().copied())
    }

    pub fn logout_command(&self) -> Result<CommandLine> {
        let (program, args) = self
            .logout_command
            .split_first()
            .ok_or_else(|| GfxSwitchError::Config("logout_command must not be empty".to_string()))?;
        Ok(CommandLine::new(program).args(args.iter().map(String::as_str)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool.trim().is_empty() {
            return Err(GfxSwitchError::Config("tool must not be empty".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(GfxSwitchError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        self.logout_command()?;
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: SwitcherConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration, writing the defaults first if the file is missing.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from_file(path)
                .map_err(|e| GfxSwitchError::Config(format!("Failed to load config: {}", e)));
        }

        let config = Self::new();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        config
            .save_to_file(path)
            .map_err(|e| GfxSwitchError::Config(format!("Failed to save default config: {}", e)))?;
        info!("Wrote default configuration to {}", path.display());
        Ok(config)
    }

    pub fn get_config_path() -> PathBuf {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".config")
            });
        base.join("gfx-mode-switcher").join("config.json")
    }
}
