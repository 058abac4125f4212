//! GPU profile registry and the rules for moving between profiles

use crate::errors::{GfxSwitchError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// GPU modes known to supergfxctl.
///
/// Variants are declared in registry order, so sorting by id yields the
/// order in which menu entries are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProfileId {
    Integrated,
    Hybrid,
    Vfio,
    AsusEgpu,
    AsusMuxDgpu,
}

impl ProfileId {
    /// Symbolic name as printed and accepted by supergfxctl.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integrated => "Integrated",
            Self::Hybrid => "Hybrid",
            Self::Vfio => "Vfio",
            Self::AsusEgpu => "AsusEgpu",
            Self::AsusMuxDgpu => "AsusMuxDgpu",
        }
    }

    pub fn descriptor(self) -> &'static ProfileDescriptor {
        // REGISTRY holds exactly one descriptor per variant, in declaration order
        &REGISTRY[self as usize]
    }

    /// Map the numeric mode carried by the daemon's `NotifyGfx` signal.
    ///
    /// Modes this tool does not manage (NvidiaNoModeset, None) map to `None`.
    pub fn from_mode_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Hybrid),
            1 => Some(Self::Integrated),
            3 => Some(Self::Vfio),
            4 => Some(Self::AsusEgpu),
            5 => Some(Self::AsusMuxDgpu),
            _ => None,
        }
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileId {
    type Err = GfxSwitchError;

    /// Case-sensitive match against the registry ids, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        REGISTRY
            .iter()
            .map(|descriptor| descriptor.id)
            .find(|id| id.as_str() == name)
            .ok_or_else(|| GfxSwitchError::UnknownProfile(name.to_string()))
    }
}

/// Static description of one GPU mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDescriptor {
    pub id: ProfileId,
    pub display_name: &'static str,
    pub icon_name: &'static str,
    /// Arguments passed to the mode tool to activate this profile.
    pub activation_args: &'static [&'static str],
}

pub static REGISTRY: [ProfileDescriptor; 5] = [
    ProfileDescriptor {
        id: ProfileId::Integrated,
        display_name: "Integrated",
        icon_name: "computer-symbolic",
        activation_args: &["-m", "Integrated"],
    },
    ProfileDescriptor {
        id: ProfileId::Hybrid,
        display_name: "Hybrid",
        icon_name: "processor-symbolic",
        activation_args: &["-m", "Hybrid"],
    },
    ProfileDescriptor {
        id: ProfileId::Vfio,
        display_name: "VFIO",
        icon_name: "applications-engineering-symbolic",
        activation_args: &["-m", "Vfio"],
    },
    ProfileDescriptor {
        id: ProfileId::AsusEgpu,
        display_name: "ASUS eGPU",
        icon_name: "video-display-symbolic",
        activation_args: &["-m", "AsusEgpu"],
    },
    ProfileDescriptor {
        id: ProfileId::AsusMuxDgpu,
        display_name: "ASUS MUX dGPU",
        icon_name: "graphics-card-symbolic",
        activation_args: &["-m", "AsusMuxDgpu"],
    },
];

/// Every profile in the registry
pub fn all_profiles() -> BTreeSet<ProfileId> {
    REGISTRY.iter().map(|descriptor| descriptor.id).collect()
}

/// Parse the output of `supergfxctl -s`, e.g. `[Integrated, Hybrid, Vfio]`.
///
/// Entries that do not name a registry profile are dropped.
pub fn parse_supported_profiles(output: &str) -> BTreeSet<ProfileId> {
    let trimmed = output.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);

    inner
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<ProfileId>() {
            Ok(id) => Some(id),
            Err(_) => {
                debug!("Ignoring unknown profile in supported list: {}", entry);
                None
            }
        })
        .collect()
}

/// Vfio and Hybrid cannot be switched between directly.
pub fn is_forbidden_transition(from: ProfileId, to: ProfileId) -> bool {
    matches!(
        (from, to),
        (ProfileId::Vfio, ProfileId::Hybrid) | (ProfileId::Hybrid, ProfileId::Vfio)
    )
}

/// Only Integrated <-> Hybrid needs a fresh graphical session.
pub fn requires_logout(from: ProfileId, to: ProfileId) -> bool {
    matches!(
        (from, to),
        (ProfileId::Integrated, ProfileId::Hybrid) | (ProfileId::Hybrid, ProfileId::Integrated)
    )
}
