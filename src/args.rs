//! Command line argument parsing for the GPU mode switcher

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// GPU Mode Switcher
///
/// Switches the laptop GPU mode through supergfxctl, retrying failed
/// commands and logging out when the new mode needs a fresh session.
#[derive(Parser, Debug)]
#[command(name = "gfx-mode-switcher")]
#[command(about = "Switch the GPU mode through supergfxctl")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file [default: $XDG_CONFIG_HOME/gfx-mode-switcher/config.json]
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Show the GPU mode menu with the active profile checked
    List,
    /// Print the active GPU profile
    Get,
    /// Switch to a GPU profile
    Set {
        /// Profile name: Integrated, Hybrid, Vfio, AsusEgpu or AsusMuxDgpu
        mode: String,
    },
    /// Follow mode changes and accept profile names on stdin until interrupted
    Watch,
}
