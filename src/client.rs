//! Client implementation for the GPU mode switcher

use crate::{
    args::{Args, Commands},
    config::SwitcherConfig,
    controller::{ActivationOutcome, ControllerEvent, ProfileController},
    dbus::GfxChangeWatcher,
    errors::Result,
    executor::SystemExecutor,
    menu::ProfileMenu,
    notify::DesktopNotifier,
    profile::ProfileId,
    session::CommandSessionControl,
};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Runs CLI commands against a [`ProfileController`]
pub struct GfxModeClient {
    config: SwitcherConfig,
    controller: ProfileController,
}

impl GfxModeClient {
    /// Create a client driving the real supergfxctl and logout commands
    pub fn new(config: SwitcherConfig) -> Result<Self> {
        let session = CommandSessionControl::new(config.logout_command()?);
        let controller = ProfileController::new(
            config.clone(),
            Arc::new(SystemExecutor::new()),
            Arc::new(session),
        );
        Ok(Self::with_controller(config, controller))
    }

    pub fn with_controller(config: SwitcherConfig, controller: ProfileController) -> Self {
        Self { config, controller }
    }

    /// Handle CLI commands
    pub async fn handle_args(&self, args: Args) -> Result<()> {
        match args.command {
            Commands::List => {
                print!("{}", self.menu().await?);
                Ok(())
            }
            Commands::Get => {
                println!("{}", self.current().await?);
                Ok(())
            }
            Commands::Set { mode } => {
                let outcome = self.switch(&mode).await?;
                println!("{}", describe(&outcome));
                Ok(())
            }
            Commands::Watch => self.watch().await,
        }
    }

    /// Menu model after synchronizing with the daemon
    pub async fn menu(&self) -> Result<ProfileMenu> {
        let snapshot = self.controller.start().await?;
        Ok(ProfileMenu::from_snapshot(&snapshot))
    }

    pub async fn current(&self) -> Result<ProfileId> {
        let snapshot = self.controller.start().await?;
        // start always leaves an active profile behind, falling back to the default
        Ok(snapshot
            .active_profile
            .unwrap_or(self.config.default_profile))
    }

    pub async fn switch(&self, mode: &str) -> Result<ActivationOutcome> {
        self.controller.start().await?;
        self.controller.activate_by_name(mode).await
    }

    /// Follow daemon mode changes until Ctrl-C.
    ///
    /// Each line read from stdin is taken as a profile to activate.
    async fn watch(&self) -> Result<()> {
        let snapshot = self.controller.start().await?;
        let mut events = self.controller.subscribe();
        let mut menu = ProfileMenu::from_snapshot(&snapshot);
        print!("{}", menu);

        match GfxChangeWatcher::new().await {
            Ok(watcher) => {
                if watcher.daemon_available().await {
                    watcher.attach(&self.controller);
                } else {
                    warn!("supergfxd is not on the system bus, changes made elsewhere will go unnoticed");
                }
            }
            Err(e) => warn!("Cannot watch for mode changes: {}", e),
        }

        let notifier = if self.config.desktop_notifications {
            match DesktopNotifier::new().await {
                Ok(notifier) => Some(notifier),
                Err(e) => {
                    warn!("Desktop notifications unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let mut requests = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let interrupted = tokio::signal::ctrl_c();
        tokio::pin!(interrupted);

        loop {
            tokio::select! {
                _ = &mut interrupted => {
                    info!("Interrupted, shutting down");
                    break;
                }
                line = requests.next_line(), if stdin_open => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => self.spawn_activation(line),
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("Cannot read from stdin: {}", e);
                        stdin_open = false;
                    }
                },
                event = events.recv() => match event {
                    Ok(event) => {
                        if let ControllerEvent::Notice(notice) = &event {
                            eprintln!("{}", notice);
                            if let Some(notifier) = &notifier {
                                if let Err(e) = notifier.show(notice).await {
                                    warn!("Failed to show notification: {}", e);
                                }
                            }
                        }
                        let redraw = matches!(event, ControllerEvent::ActiveProfileChanged { .. });
                        menu.apply(&event);
                        if redraw {
                            print!("{}", menu);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Missed {} controller events, rebuilding menu", skipped);
                        menu = ProfileMenu::from_snapshot(&self.controller.snapshot());
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        self.controller.shutdown();
        Ok(())
    }

    fn spawn_activation(&self, name: String) {
        let controller = self.controller.clone();
        tokio::spawn(async move {
            match controller.activate_by_name(name.trim()).await {
                Ok(outcome) => println!("{}", describe(&outcome)),
                // Rejections and failures already reached the user as notices
                Err(e) => error!("Activation of {} failed: {}", name.trim(), e),
            }
        });
    }
}

fn describe(outcome: &ActivationOutcome) -> String {
    match outcome {
        ActivationOutcome::AlreadyActive(profile) => format!("{} is already active", profile),
        ActivationOutcome::Switched {
            to,
            logout_requested: true,
            ..
        } => format!("Switched GPU mode to {}, logging out to apply it", to),
        ActivationOutcome::Switched { to, .. } => format!("Switched GPU mode to {}", to),
    }
}
