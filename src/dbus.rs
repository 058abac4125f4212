//! supergfxd mode change subscription over the system bus

use crate::controller::ProfileController;
use crate::errors::{GfxSwitchError, Result};
use crate::{SUPERGFX_INTERFACE, SUPERGFX_OBJECT_PATH, SUPERGFX_SERVICE_NAME};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use zbus::{Connection, Proxy};

/// Signal emitted by supergfxd whenever any client changes the mode
pub const MODE_CHANGED_SIGNAL: &str = "NotifyGfx";

/// Forwards supergfxd's `NotifyGfx` signal to a [`ProfileController`]
pub struct GfxChangeWatcher {
    connection: Connection,
}

impl GfxChangeWatcher {
    pub async fn new() -> Result<Self> {
        let connection = Connection::system().await.map_err(GfxSwitchError::DBus)?;
        debug!("Connected to the system bus");
        Ok(Self { connection })
    }

    /// Check whether supergfxd currently owns its bus name
    pub async fn daemon_available(&self) -> bool {
        let proxy = match Proxy::new(
            &self.connection,
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
        )
        .await
        {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!("Cannot query the bus daemon: {}", e);
                return false;
            }
        };

        let result: std::result::Result<bool, zbus::Error> =
            proxy.call("NameHasOwner", &(SUPERGFX_SERVICE_NAME)).await;
        match result {
            Ok(owned) => owned,
            Err(e) => {
                warn!("NameHasOwner({}) failed: {}", SUPERGFX_SERVICE_NAME, e);
                false
            }
        }
    }

    /// Resynchronize `controller` on every mode change until the stream ends
    /// or the controller shuts down.
    pub async fn listen(self, controller: ProfileController) -> Result<()> {
        let proxy = Proxy::new(
            &self.connection,
            SUPERGFX_SERVICE_NAME,
            SUPERGFX_OBJECT_PATH,
            SUPERGFX_INTERFACE,
        )
        .await?;
        let mut changes = proxy.receive_signal(MODE_CHANGED_SIGNAL).await?;
        info!(
            "Listening for {} on {}",
            MODE_CHANGED_SIGNAL, SUPERGFX_OBJECT_PATH
        );

        while let Some(message) = changes.next().await {
            let mode: u32 = match message.body() {
                Ok(mode) => mode,
                Err(e) => {
                    warn!("Malformed {} signal: {}", MODE_CHANGED_SIGNAL, e);
                    continue;
                }
            };

            match controller.handle_external_change(mode).await {
                Ok(_) => {}
                Err(GfxSwitchError::Shutdown) => break,
                Err(e) => warn!("Resynchronization after mode change failed: {}", e),
            }
        }

        debug!("Stopped listening for {}", MODE_CHANGED_SIGNAL);
        Ok(())
    }

    /// Run [`listen`](Self::listen) in the background; shutting the
    /// controller down ends the subscription.
    pub fn attach(self, controller: &ProfileController) {
        let listener = controller.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = self.listen(listener).await {
                error!("Mode change subscription failed: {}", e);
            }
        });
        controller.attach_subscription(handle);
    }
}
