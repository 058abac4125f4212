//! Toolkit-independent model of the GPU mode toggle and its submenu

use crate::controller::{ControllerEvent, ControllerSnapshot};
use crate::profile::ProfileId;
use std::fmt;

pub const MENU_TITLE: &str = "GPU Mode";
pub const HEADER_ICON: &str = "graphics-card-symbolic";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub profile: ProfileId,
    pub label: &'static str,
    pub icon_name: &'static str,
    /// Carries the check ornament.
    pub active: bool,
}

/// Quick-settings style toggle: title, subtitle, icon, checked state, and
/// one entry per supported profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileMenu {
    entries: Vec<MenuEntry>,
    active: Option<ProfileId>,
    subtitle: Option<&'static str>,
    icon_name: &'static str,
    checked: bool,
}

impl ProfileMenu {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            active: None,
            subtitle: None,
            icon_name: HEADER_ICON,
            checked: false,
        }
    }

    /// Entries follow registry order whatever order `supported` is in.
    pub fn build<I>(supported: I) -> Self
    where
        I: IntoIterator<Item = ProfileId>,
    {
        let mut menu = Self::new();
        menu.rebuild(supported);
        menu
    }

    pub fn from_snapshot(snapshot: &ControllerSnapshot) -> Self {
        let mut menu = Self::build(snapshot.supported_profiles.iter().copied());
        menu.sync(snapshot.active_profile);
        menu
    }

    fn rebuild<I>(&mut self, supported: I)
    where
        I: IntoIterator<Item = ProfileId>,
    {
        let mut profiles: Vec<ProfileId> = supported.into_iter().collect();
        profiles.sort();
        profiles.dedup();

        self.entries = profiles
            .into_iter()
            .map(|profile| {
                let descriptor = profile.descriptor();
                MenuEntry {
                    profile,
                    label: descriptor.display_name,
                    icon_name: descriptor.icon_name,
                    active: false,
                }
            })
            .collect();
        self.sync(self.active);
    }

    /// Move the ornament, subtitle and icon to `active`.
    pub fn sync(&mut self, active: Option<ProfileId>) {
        self.active = active;
        for entry in &mut self.entries {
            entry.active = Some(entry.profile) == active;
        }
        match active {
            Some(profile) => {
                let descriptor = profile.descriptor();
                self.subtitle = Some(descriptor.display_name);
                self.icon_name = descriptor.icon_name;
                self.checked = profile != ProfileId::Integrated;
            }
            None => {
                self.subtitle = None;
                self.icon_name = HEADER_ICON;
                self.checked = false;
            }
        }
    }

    pub fn apply(&mut self, event: &ControllerEvent) {
        match event {
            ControllerEvent::SupportedProfiles(profiles) => self.rebuild(profiles.iter().copied()),
            ControllerEvent::ActiveProfileChanged { current, .. } => self.sync(Some(*current)),
            ControllerEvent::Notice(_) => {}
        }
    }

    pub fn entries(&self) -> &[MenuEntry] {
        &self.entries
    }

    pub fn active_profile(&self) -> Option<ProfileId> {
        self.active
    }

    pub fn subtitle(&self) -> Option<&'static str> {
        self.subtitle
    }

    pub fn icon_name(&self) -> &'static str {
        self.icon_name
    }

    pub fn checked(&self) -> bool {
        self.checked
    }
}

impl Default for ProfileMenu {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProfileMenu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subtitle {
            Some(subtitle) => writeln!(f, "{}: {}", MENU_TITLE, subtitle)?,
            None => writeln!(f, "{}", MENU_TITLE)?,
        }
        for entry in &self.entries {
            let ornament = if entry.active { "✓" } else { " " };
            writeln!(f, "  {} {:<14} ({})", ornament, entry.label, entry.profile)?;
        }
        Ok(())
    }
}
