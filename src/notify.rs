//! Desktop notifications for user-facing notices

use crate::controller::UserNotice;
use crate::errors::{GfxSwitchError, Result};
use crate::menu::MENU_TITLE;
use log::debug;
use std::collections::HashMap;
use zbus::{Connection, Proxy};
use zvariant::Value;

const APP_NAME: &str = "gfx-mode-switcher";
const EXPIRE_TIMEOUT_MS: i32 = 5000;

/// Sends notices through `org.freedesktop.Notifications` on the session bus
pub struct DesktopNotifier {
    connection: Connection,
}

impl DesktopNotifier {
    pub async fn new() -> Result<Self> {
        let connection = Connection::session().await.map_err(GfxSwitchError::DBus)?;
        Ok(Self { connection })
    }

    /// Show `notice`, returning the server-assigned notification id.
    pub async fn show(&self, notice: &UserNotice) -> Result<u32> {
        let proxy = Proxy::new(
            &self.connection,
            "org.freedesktop.Notifications",
            "/org/freedesktop/Notifications",
            "org.freedesktop.Notifications",
        )
        .await?;

        let mut hints: HashMap<&str, Value<'_>> = HashMap::new();
        hints.insert("urgency", Value::from(urgency(notice)));

        let body = notice.to_string();
        let id: u32 = proxy
            .call(
                "Notify",
                &(
                    APP_NAME,
                    0u32,
                    icon_name(notice),
                    MENU_TITLE,
                    body.as_str(),
                    Vec::<&str>::new(),
                    hints,
                    EXPIRE_TIMEOUT_MS,
                ),
            )
            .await?;

        debug!("Shown notification {}: {}", id, body);
        Ok(id)
    }
}

fn icon_name(notice: &UserNotice) -> &'static str {
    match notice {
        UserNotice::MustPassThroughIntegrated { .. } => "dialog-warning-symbolic",
        UserNotice::SwitchFailed { .. } => "dialog-error-symbolic",
    }
}

/// Freedesktop urgency levels: 1 normal, 2 critical
fn urgency(notice: &UserNotice) -> u8 {
    match notice {
        UserNotice::MustPassThroughIntegrated { .. } => 1,
        UserNotice::SwitchFailed { .. } => 2,
    }
}
