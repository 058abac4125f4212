//! Profile controller
//!
//! Owns the active/supported GPU profile state, drives the mode tool through
//! the retry combinator, validates transitions and publishes state changes to
//! subscribers.
//!
//! Every state-changing operation holds the operation lock for its whole
//! duration, so a resynchronization and a user activation that arrive at the
//! same time run one after the other in arrival order. Transition guards are
//! checked once the lock is held.

use crate::config::SwitcherConfig;
use crate::errors::{GfxSwitchError, Result};
use crate::executor::{CommandExecutor, CommandLine, CommandOutput};
use crate::profile::{
    all_profiles, is_forbidden_transition, parse_supported_profiles, requires_logout, ProfileId,
};
use crate::retry::{execute_with_retry, RetryPolicy, RetryTimer};
use crate::session::SessionControl;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Uninitialized,
    Synchronizing,
    Idle(ProfileId),
    Activating(ProfileId),
    Stopped,
}

/// Message meant for the user rather than the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotice {
    MustPassThroughIntegrated { from: ProfileId, to: ProfileId },
    SwitchFailed { target: ProfileId },
}

impl fmt::Display for UserNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MustPassThroughIntegrated { from, to } => write!(
                f,
                "Switching from {} to {} is not possible. Switch to Integrated first.",
                from, to
            ),
            Self::SwitchFailed { target } => write!(f, "Failed to switch GPU mode to {}", target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Supported set in registry order.
    SupportedProfiles(Vec<ProfileId>),
    ActiveProfileChanged {
        previous: Option<ProfileId>,
        current: ProfileId,
    },
    Notice(UserNotice),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub phase: ControllerPhase,
    pub active_profile: Option<ProfileId>,
    pub supported_profiles: BTreeSet<ProfileId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    AlreadyActive(ProfileId),
    Switched {
        from: Option<ProfileId>,
        to: ProfileId,
        logout_requested: bool,
    },
}

struct ControllerState {
    phase: ControllerPhase,
    active: Option<ProfileId>,
    supported: BTreeSet<ProfileId>,
}

struct Inner {
    config: SwitcherConfig,
    policy: RetryPolicy,
    executor: Arc<dyn CommandExecutor>,
    session: Arc<dyn SessionControl>,
    state: Mutex<ControllerState>,
    operations: tokio::sync::Mutex<()>,
    timer: RetryTimer,
    events: broadcast::Sender<ControllerEvent>,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
    live: AtomicBool,
}

/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ProfileController {
    inner: Arc<Inner>,
}

impl ProfileController {
    pub fn new(
        config: SwitcherConfig,
        executor: Arc<dyn CommandExecutor>,
        session: Arc<dyn SessionControl>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let policy = config.retry_policy();
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                executor,
                session,
                state: Mutex::new(ControllerState {
                    phase: ControllerPhase::Uninitialized,
                    active: None,
                    supported: BTreeSet::new(),
                }),
                operations: tokio::sync::Mutex::new(()),
                timer: RetryTimer::new(),
                events,
                subscriptions: Mutex::new(Vec::new()),
                live: AtomicBool::new(true),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let state = self.state();
        ControllerSnapshot {
            phase: state.phase,
            active_profile: state.active,
            supported_profiles: state.supported.clone(),
        }
    }

    pub fn active_profile(&self) -> Option<ProfileId> {
        self.state().active
    }

    pub fn supported_profiles(&self) -> BTreeSet<ProfileId> {
        self.state().supported.clone()
    }

    pub fn phase(&self) -> ControllerPhase {
        self.state().phase
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn retry_pending(&self) -> bool {
        self.inner.timer.is_pending()
    }

    pub fn retries_scheduled(&self) -> u64 {
        self.inner.timer.scheduled()
    }

    /// Tie a background task (e.g. a signal listener) to the controller's lifetime.
    pub fn attach_subscription(&self, handle: JoinHandle<()>) {
        if !self.is_live() {
            handle.abort();
            return;
        }
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(GfxSwitchError::Shutdown)
        }
    }

    fn emit(&self, event: ControllerEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    fn notify_user(&self, notice: UserNotice) {
        warn!("{}", notice);
        self.emit(ControllerEvent::Notice(notice));
    }

    async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        let result = execute_with_retry(
            self.inner.executor.as_ref(),
            command,
            &self.inner.policy,
            &self.inner.timer,
        )
        .await;
        // The controller may have been torn down while the process ran
        self.ensure_live()?;
        result
    }

    fn set_active(&self, profile: ProfileId) {
        let previous = {
            let mut state = self.state();
            let previous = state.active.replace(profile);
            state.phase = ControllerPhase::Idle(profile);
            previous
        };
        if previous != Some(profile) {
            info!("Active GPU profile: {}", profile);
            self.emit(ControllerEvent::ActiveProfileChanged {
                previous,
                current: profile,
            });
        }
    }

    /// Query supported and current profiles from the daemon.
    pub async fn start(&self) -> Result<ControllerSnapshot> {
        self.ensure_live()?;
        let _operation = self.inner.operations.lock().await;
        self.ensure_live()?;

        self.state().phase = ControllerPhase::Synchronizing;
        debug!("Synchronizing with the GPU daemon");

        self.load_supported().await?;
        self.load_current().await?;
        Ok(self.snapshot())
    }

    /// Re-query the current profile.
    pub async fn refresh_current(&self) -> Result<ProfileId> {
        self.ensure_live()?;
        let _operation = self.inner.operations.lock().await;
        self.ensure_live()?;
        if self.state().supported.is_empty() {
            return Err(GfxSwitchError::NotStarted);
        }
        self.load_current().await
    }

    /// The daemon reported a mode change made by some client.
    ///
    /// The index is only logged; the current profile is always re-queried.
    pub async fn handle_external_change(&self, mode_index: u32) -> Result<ProfileId> {
        match ProfileId::from_mode_index(mode_index) {
            Some(profile) => info!("Daemon reports GPU mode change to {}", profile),
            None => info!("Daemon reports GPU mode change (mode {})", mode_index),
        }
        self.refresh_current().await
    }

    async fn load_supported(&self) -> Result<()> {
        let command = self.inner.config.supported_command();
        let supported = match self.run(&command).await {
            Ok(output) => {
                let parsed = parse_supported_profiles(&output.stdout);
                if parsed.is_empty() {
                    warn!(
                        "No known profiles in `{}` output {:?}, assuming all are supported",
                        command,
                        output.stdout.trim()
                    );
                    all_profiles()
                } else {
                    parsed
                }
            }
            Err(e @ (GfxSwitchError::Shutdown | GfxSwitchError::Cancelled)) => return Err(e),
            Err(e) => {
                warn!("Could not query supported profiles, assuming all: {}", e);
                all_profiles()
            }
        };

        info!(
            "Supported GPU profiles: {}",
            supported
                .iter()
                .map(|profile| profile.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.state().supported = supported.clone();
        self.emit(ControllerEvent::SupportedProfiles(
            supported.into_iter().collect(),
        ));
        Ok(())
    }

    async fn load_current(&self) -> Result<ProfileId> {
        let command = self.inner.config.current_command();
        let fallback = self.fallback_profile();
        let profile = match self.run(&command).await {
            Ok(output) => match output.stdout.parse::<ProfileId>() {
                Ok(profile) if self.state().supported.contains(&profile) => profile,
                Ok(profile) => {
                    warn!(
                        "Daemon reports unsupported profile {}, using {}",
                        profile, fallback
                    );
                    fallback
                }
                Err(e) => {
                    warn!("{}, using {}", e, fallback);
                    fallback
                }
            },
            Err(e @ (GfxSwitchError::Shutdown | GfxSwitchError::Cancelled)) => return Err(e),
            Err(e) => {
                warn!("Could not query current profile, using {}: {}", fallback, e);
                fallback
            }
        };

        self.set_active(profile);
        Ok(profile)
    }

    /// Configured default, or the first supported profile when the daemon
    /// does not offer the default on this machine.
    fn fallback_profile(&self) -> ProfileId {
        let default = self.inner.config.default_profile;
        let state = self.state();
        if state.supported.contains(&default) {
            return default;
        }
        match state.supported.first() {
            Some(&first) => {
                warn!(
                    "Default profile {} is not supported here, falling back to {}",
                    default, first
                );
                first
            }
            None => default,
        }
    }

    /// Activate a profile given by name, as typed by the user.
    pub async fn activate_by_name(&self, name: &str) -> Result<ActivationOutcome> {
        let target = name.parse::<ProfileId>().map_err(|e| {
            warn!("Dropping activation request: {}", e);
            e
        })?;
        self.activate(target).await
    }

    pub async fn activate(&self, target: ProfileId) -> Result<ActivationOutcome> {
        self.ensure_live()?;
        let _operation = self.inner.operations.lock().await;
        self.ensure_live()?;

        let (current, phase) = {
            let state = self.state();
            if state.supported.is_empty() {
                return Err(GfxSwitchError::NotStarted);
            }
            if !state.supported.contains(&target) {
                warn!("Dropping activation request for unsupported profile {}", target);
                return Err(GfxSwitchError::UnsupportedProfile(target));
            }
            (state.active, state.phase)
        };

        if current == Some(target) {
            debug!("{} is already active", target);
            return Ok(ActivationOutcome::AlreadyActive(target));
        }
        if let Some(from) = current {
            if is_forbidden_transition(from, target) {
                self.notify_user(UserNotice::MustPassThroughIntegrated { from, to: target });
                return Err(GfxSwitchError::InvalidTransition { from, to: target });
            }
        }

        self.state().phase = ControllerPhase::Activating(target);
        info!(
            "Switching GPU mode from {} to {}",
            current.map_or("unknown", ProfileId::as_str),
            target
        );

        match self.run(&self.inner.config.activation_command(target)).await {
            Ok(_) => {
                self.set_active(target);
                let logout_requested = current.map_or(false, |from| requires_logout(from, target));
                if logout_requested {
                    self.inner.session.request_logout();
                }
                Ok(ActivationOutcome::Switched {
                    from: current,
                    to: target,
                    logout_requested,
                })
            }
            Err(e @ (GfxSwitchError::Shutdown | GfxSwitchError::Cancelled)) => {
                // shutdown writes Stopped under the same lock after clearing `live`
                let mut state = self.state();
                if self.is_live() {
                    state.phase = phase;
                }
                Err(e)
            }
            Err(e) => {
                self.state().phase = phase;
                self.notify_user(UserNotice::SwitchFailed { target });
                Err(e)
            }
        }
    }

    /// Cancel the pending retry, drop subscriptions and refuse further work.
    pub fn shutdown(&self) {
        if !self.inner.live.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.timer.cancel();
        for handle in self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
        self.state().phase = ControllerPhase::Stopped;
        info!("Profile controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::ScriptedExecutor;
    use crate::menu::ProfileMenu;
    use crate::session::mock::CountingSession;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    const SUPPORTED: &str = "supergfxctl -s";
    const CURRENT: &str = "supergfxctl -g";

    struct Harness {
        controller: ProfileController,
        executor: Arc<ScriptedExecutor>,
        session: Arc<CountingSession>,
        events: broadcast::Receiver<ControllerEvent>,
    }

    fn harness_with(config: SwitcherConfig, executor: ScriptedExecutor) -> Harness {
        let executor = Arc::new(executor);
        let session = Arc::new(CountingSession::default());
        let controller = ProfileController::new(config, executor.clone(), session.clone());
        let events = controller.subscribe();
        Harness {
            controller,
            executor,
            session,
            events,
        }
    }

    fn harness(executor: ScriptedExecutor) -> Harness {
        harness_with(SwitcherConfig::new(), executor)
    }

    fn daemon(supported: &str, current: &str) -> ScriptedExecutor {
        ScriptedExecutor::new()
            .reply(SUPPORTED, CommandOutput::success(supported))
            .reply(CURRENT, CommandOutput::success(current))
    }

    fn drain(events: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut drained = Vec::new();
        loop {
            match events.try_recv() {
                Ok(event) => drained.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return drained,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    async fn started(executor: ScriptedExecutor) -> Harness {
        let mut h = harness(executor);
        h.controller.start().await.unwrap();
        drain(&mut h.events);
        h
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_builds_menu_from_daemon_state() {
        let mut h = harness(daemon("[Integrated,Hybrid,Vfio]\n", "Hybrid\n"));

        let snapshot = h.controller.start().await.unwrap();

        assert_eq!(
            snapshot.supported_profiles,
            [ProfileId::Integrated, ProfileId::Hybrid, ProfileId::Vfio]
                .into_iter()
                .collect::<BTreeSet<_>>()
        );
        assert_eq!(snapshot.active_profile, Some(ProfileId::Hybrid));
        assert_eq!(snapshot.phase, ControllerPhase::Idle(ProfileId::Hybrid));
        assert_eq!(h.executor.calls(), vec![SUPPORTED, CURRENT]);

        let mut menu = ProfileMenu::new();
        for event in drain(&mut h.events) {
            menu.apply(&event);
        }
        assert_eq!(menu.entries().len(), 3);
        let active: Vec<_> = menu.entries().iter().filter(|e| e.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].profile, ProfileId::Hybrid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supported_query_failure_falls_back_to_registry() {
        let executor = ScriptedExecutor::new()
            .reply(SUPPORTED, CommandOutput::failure("daemon not running"))
            .reply(CURRENT, CommandOutput::success("Integrated"));
        let h = harness(executor);

        let snapshot = h.controller.start().await.unwrap();

        assert_eq!(snapshot.supported_profiles, all_profiles());
        assert_eq!(snapshot.active_profile, Some(ProfileId::Integrated));
        assert_eq!(h.executor.call_count(SUPPORTED), 3);
        assert_eq!(h.controller.retries_scheduled(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_output_falls_back_to_registry() {
        let h = harness(daemon("[Compute]", "Hybrid"));
        let snapshot = h.controller.start().await.unwrap();
        assert_eq!(snapshot.supported_profiles, all_profiles());
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_profile_falls_back_to_default() {
        let mut config = SwitcherConfig::new();
        config.default_profile = ProfileId::Integrated;

        // Unknown id
        let h = harness_with(config.clone(), daemon("[Integrated, Hybrid]", "Compute"));
        assert_eq!(
            h.controller.start().await.unwrap().active_profile,
            Some(ProfileId::Integrated)
        );

        // Casing differs from the registry id
        let h = harness_with(config.clone(), daemon("[Integrated, Hybrid]", "hybrid"));
        assert_eq!(
            h.controller.start().await.unwrap().active_profile,
            Some(ProfileId::Integrated)
        );

        // Known but not supported by this machine
        let h = harness_with(config.clone(), daemon("[Integrated, Hybrid]", "Vfio"));
        assert_eq!(
            h.controller.start().await.unwrap().active_profile,
            Some(ProfileId::Integrated)
        );

        // Query fails on every attempt
        let executor = ScriptedExecutor::new()
            .reply(SUPPORTED, CommandOutput::success("[Integrated, Hybrid]"))
            .reply(CURRENT, CommandOutput::failure("timeout"));
        let h = harness_with(config, executor);
        assert_eq!(
            h.controller.start().await.unwrap().active_profile,
            Some(ProfileId::Integrated)
        );
        assert_eq!(h.executor.call_count(CURRENT), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_default_falls_back_to_first_supported() {
        // Default stays Hybrid, which this machine does not offer
        let h = harness(daemon("[Integrated, Vfio]", "Compute"));

        let snapshot = h.controller.start().await.unwrap();
        assert_eq!(snapshot.active_profile, Some(ProfileId::Integrated));

        let menu = ProfileMenu::from_snapshot(&snapshot);
        assert_eq!(menu.active_profile(), Some(ProfileId::Integrated));
        assert_eq!(menu.entries().iter().filter(|e| e.active).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activating_active_profile_is_noop() {
        let mut h = started(daemon("[Integrated, Hybrid]", "Hybrid")).await;
        let calls = h.executor.calls().len();

        let outcome = h.controller.activate(ProfileId::Hybrid).await.unwrap();

        assert_eq!(outcome, ActivationOutcome::AlreadyActive(ProfileId::Hybrid));
        assert_eq!(h.executor.calls().len(), calls);
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.session.logouts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vfio_hybrid_switch_is_rejected() {
        for (current, target) in [
            (ProfileId::Vfio, ProfileId::Hybrid),
            (ProfileId::Hybrid, ProfileId::Vfio),
        ] {
            let mut h = started(daemon("[Integrated, Hybrid, Vfio]", current.as_str())).await;
            let calls = h.executor.calls().len();

            let result = h.controller.activate(target).await;

            assert!(matches!(
                result,
                Err(GfxSwitchError::InvalidTransition { from, to }) if from == current && to == target
            ));
            assert_eq!(h.executor.calls().len(), calls);
            assert_eq!(h.controller.active_profile(), Some(current));
            assert_eq!(
                drain(&mut h.events),
                vec![ControllerEvent::Notice(UserNotice::MustPassThroughIntegrated {
                    from: current,
                    to: target,
                })]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_only_between_integrated_and_hybrid() {
        let cases = [
            (ProfileId::Integrated, ProfileId::Hybrid, 1),
            (ProfileId::Hybrid, ProfileId::Integrated, 1),
            (ProfileId::Hybrid, ProfileId::AsusMuxDgpu, 0),
            (ProfileId::Integrated, ProfileId::Vfio, 0),
            (ProfileId::Vfio, ProfileId::Integrated, 0),
            (ProfileId::AsusEgpu, ProfileId::Hybrid, 0),
        ];

        for (current, target, logouts) in cases {
            let activation = format!("supergfxctl -m {}", target);
            let executor = daemon("[Integrated, Hybrid, Vfio, AsusEgpu, AsusMuxDgpu]", current.as_str())
                .reply(&activation, CommandOutput::success(""));
            let mut h = started(executor).await;

            let outcome = h.controller.activate(target).await.unwrap();

            assert_eq!(
                outcome,
                ActivationOutcome::Switched {
                    from: Some(current),
                    to: target,
                    logout_requested: logouts == 1,
                }
            );
            assert_eq!(h.session.logouts(), logouts, "{} -> {}", current, target);
            assert_eq!(h.executor.call_count(&activation), 1);
            assert_eq!(h.controller.active_profile(), Some(target));
            assert_eq!(
                drain(&mut h.events),
                vec![ControllerEvent::ActiveProfileChanged {
                    previous: Some(current),
                    current: target,
                }]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_retries_then_succeeds() {
        let executor = daemon("[Integrated, Hybrid]", "Integrated")
            .reply("supergfxctl -m Hybrid", CommandOutput::failure("busy"))
            .reply("supergfxctl -m Hybrid", CommandOutput::failure("busy"))
            .reply("supergfxctl -m Hybrid", CommandOutput::success(""));
        let mut h = started(executor).await;

        let outcome = h.controller.activate(ProfileId::Hybrid).await.unwrap();

        assert!(matches!(outcome, ActivationOutcome::Switched { .. }));
        assert_eq!(h.controller.retries_scheduled(), 2);
        assert_eq!(h.session.logouts(), 1);
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert!(!events
            .iter()
            .any(|event| matches!(event, ControllerEvent::Notice(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_activation_keeps_profile_and_notifies() {
        let executor = daemon("[Integrated, Hybrid, AsusMuxDgpu]", "Hybrid")
            .reply("supergfxctl -m AsusMuxDgpu", CommandOutput::failure("mux locked"));
        let mut h = started(executor).await;

        let result = h.controller.activate(ProfileId::AsusMuxDgpu).await;

        assert!(matches!(
            result,
            Err(GfxSwitchError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(h.executor.call_count("supergfxctl -m AsusMuxDgpu"), 3);
        assert_eq!(h.controller.active_profile(), Some(ProfileId::Hybrid));
        assert_eq!(h.controller.phase(), ControllerPhase::Idle(ProfileId::Hybrid));
        assert_eq!(
            drain(&mut h.events),
            vec![ControllerEvent::Notice(UserNotice::SwitchFailed {
                target: ProfileId::AsusMuxDgpu
            })]
        );
        assert_eq!(h.session.logouts(), 0);

        // Still usable afterwards
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(h.executor.call_count("supergfxctl -m AsusMuxDgpu"), 3);
        assert_eq!(
            h.controller.activate(ProfileId::Hybrid).await.unwrap(),
            ActivationOutcome::AlreadyActive(ProfileId::Hybrid)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_unsupported_requests_are_dropped() {
        let h = started(daemon("[Integrated, Hybrid]", "Hybrid")).await;
        let calls = h.executor.calls().len();

        assert!(matches!(
            h.controller.activate_by_name("Dedicated").await,
            Err(GfxSwitchError::UnknownProfile(_))
        ));
        assert!(matches!(
            h.controller.activate(ProfileId::AsusEgpu).await,
            Err(GfxSwitchError::UnsupportedProfile(ProfileId::AsusEgpu))
        ));
        assert_eq!(h.executor.calls().len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_before_start_is_rejected() {
        let h = harness(daemon("[Integrated, Hybrid]", "Hybrid"));
        assert!(matches!(
            h.controller.activate(ProfileId::Integrated).await,
            Err(GfxSwitchError::NotStarted)
        ));
        assert!(h.executor.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_retry() {
        let executor = daemon("[Integrated, Hybrid]", "Hybrid")
            .reply("supergfxctl -m Integrated", CommandOutput::failure("busy"));
        let mut h = started(executor).await;

        let task = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.activate(ProfileId::Integrated).await })
        };
        while !h.controller.retry_pending() {
            tokio::task::yield_now().await;
        }

        h.controller.shutdown();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(matches!(task.await.unwrap(), Err(GfxSwitchError::Shutdown)));
        assert_eq!(h.executor.call_count("supergfxctl -m Integrated"), 1);
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.session.logouts(), 0);
        assert_eq!(h.controller.phase(), ControllerPhase::Stopped);
        assert_eq!(h.controller.active_profile(), Some(ProfileId::Hybrid));
        assert!(matches!(
            h.controller.refresh_current().await,
            Err(GfxSwitchError::Shutdown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_retry_restores_phase() {
        let executor = daemon("[Integrated, Hybrid]", "Hybrid")
            .reply("supergfxctl -m Integrated", CommandOutput::failure("busy"));
        let mut h = started(executor).await;

        let task = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.activate(ProfileId::Integrated).await })
        };
        while !h.controller.retry_pending() {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            h.controller.phase(),
            ControllerPhase::Activating(ProfileId::Integrated)
        );

        // A second timer on the same handle cancels the pending one
        let other = {
            let controller = h.controller.clone();
            tokio::spawn(async move {
                controller
                    .inner
                    .timer
                    .wait(Duration::from_secs(60))
                    .await
            })
        };

        assert!(matches!(task.await.unwrap(), Err(GfxSwitchError::Cancelled)));
        assert!(h.controller.is_live());
        assert_eq!(h.controller.phase(), ControllerPhase::Idle(ProfileId::Hybrid));
        assert_eq!(h.controller.active_profile(), Some(ProfileId::Hybrid));
        assert!(drain(&mut h.events).is_empty());
        other.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_subscriptions() {
        let h = started(daemon("[Integrated, Hybrid]", "Hybrid")).await;
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let listener = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await
        });
        h.controller.attach_subscription(listener);

        h.controller.shutdown();

        // Aborting the task drops the sender
        assert!(alive_rx.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_change_requeries_daemon() {
        let executor = ScriptedExecutor::new()
            .reply(SUPPORTED, CommandOutput::success("[Integrated, Hybrid, Vfio]"))
            .reply(CURRENT, CommandOutput::success("Hybrid"))
            .reply(CURRENT, CommandOutput::success("Integrated"));
        let mut h = started(executor).await;

        // Signal payload says Vfio, the daemon says Integrated
        let profile = h.controller.handle_external_change(3).await.unwrap();

        assert_eq!(profile, ProfileId::Integrated);
        assert_eq!(h.executor.call_count(CURRENT), 2);
        assert_eq!(
            drain(&mut h.events),
            vec![ControllerEvent::ActiveProfileChanged {
                previous: Some(ProfileId::Hybrid),
                current: ProfileId::Integrated,
            }]
        );
        assert_eq!(h.session.logouts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_waits_for_running_resync() {
        let executor = ScriptedExecutor::new()
            .reply(SUPPORTED, CommandOutput::success("[Integrated, Hybrid]"))
            .reply(CURRENT, CommandOutput::success("Hybrid"))
            .reply(CURRENT, CommandOutput::success("Integrated"));
        let h = started(executor).await;
        let gate = h.executor.hold();

        let resync = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.handle_external_change(1).await })
        };
        while h.executor.call_count(CURRENT) < 2 {
            tokio::task::yield_now().await;
        }

        let activation = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.activate(ProfileId::Integrated).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.executor.call_count("supergfxctl -m Integrated"), 0);

        gate.notify_one();

        assert_eq!(resync.await.unwrap().unwrap(), ProfileId::Integrated);
        // Guards run against the state the resync left behind
        assert_eq!(
            activation.await.unwrap().unwrap(),
            ActivationOutcome::AlreadyActive(ProfileId::Integrated)
        );
        assert_eq!(h.executor.call_count("supergfxctl -m Integrated"), 0);
        assert_eq!(h.session.logouts(), 0);
    }
}
