//! GPU Mode Switcher
//!
//! Switches a laptop's GPU mode through the supergfxctl client, with retries,
//! transition checks and a session logout where the new mode requires one.

pub mod args;
pub mod client;
pub mod config;
pub mod controller;
pub mod dbus;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod menu;
pub mod notify;
pub mod profile;
pub mod retry;
pub mod session;

// supergfxd DBus names
pub const SUPERGFX_SERVICE_NAME: &str = "org.supergfxctl.Daemon";
pub const SUPERGFX_OBJECT_PATH: &str = "/org/supergfxctl/Gfx";
pub const SUPERGFX_INTERFACE: &str = "org.supergfxctl.Daemon";

// Re-export commonly used types
pub use config::SwitcherConfig;
pub use controller::{ActivationOutcome, ControllerEvent, ProfileController, UserNotice};
pub use errors::{GfxSwitchError, Result};
pub use profile::{ProfileDescriptor, ProfileId};
