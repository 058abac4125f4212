//! Fixed-delay retry of external commands

use crate::errors::{GfxSwitchError, Result};
use crate::executor::{CommandExecutor, CommandLine, CommandOutput};
use log::{error, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first run included.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Holds the one outstanding retry timer.
///
/// Scheduling a timer cancels whichever timer was pending before it, and
/// `cancel` invalidates the pending timer plus any scheduled afterwards.
#[derive(Debug, Default)]
pub struct RetryTimer {
    pending: Mutex<Option<(u64, watch::Sender<bool>)>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl RetryTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<(u64, watch::Sender<bool>)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `delay`, or fail with `Cancelled` if superseded or cancelled first.
    pub async fn wait(&self, delay: Duration) -> Result<()> {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let generation = {
            let mut slot = self.slot();
            if self.closed.load(Ordering::SeqCst) {
                return Err(GfxSwitchError::Cancelled);
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((_, previous)) = slot.replace((generation, cancel_tx)) {
                let _ = previous.send(true);
            }
            generation
        };

        let outcome = tokio::select! {
            _ = sleep(delay) => Ok(()),
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => Err(GfxSwitchError::Cancelled),
        };

        let mut slot = self.slot();
        if matches!(slot.as_ref(), Some((current, _)) if *current == generation) {
            slot.take();
        }
        outcome
    }

    /// Cancel the pending timer and refuse new ones.
    pub fn cancel(&self) {
        let mut slot = self.slot();
        self.closed.store(true, Ordering::SeqCst);
        if let Some((_, pending)) = slot.take() {
            let _ = pending.send(true);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot().is_some()
    }

    /// Number of timers scheduled over the lifetime of this handle.
    pub fn scheduled(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Run `command`, retrying failed attempts according to `policy`.
///
/// `Ok` carries the output of the first successful attempt; once every
/// attempt has failed the result is `RetriesExhausted`.
pub async fn execute_with_retry(
    executor: &dyn CommandExecutor,
    command: &CommandLine,
    policy: &RetryPolicy,
    timer: &RetryTimer,
) -> Result<CommandOutput> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let failure = match executor.run(command).await {
            Ok(output) if output.success => return Ok(output),
            Ok(output) => output.stderr,
            Err(e) => e.stderr().map(str::to_string).unwrap_or_else(|| e.to_string()),
        };

        if attempts >= policy.max_attempts {
            error!(
                "`{}` failed after {} attempts: {}",
                command,
                attempts,
                failure.trim()
            );
            return Err(GfxSwitchError::RetriesExhausted {
                command: command.to_string(),
                attempts,
                stderr: failure.trim().to_string(),
            });
        }

        warn!(
            "`{}` failed (attempt {}/{}), retrying in {:?}: {}",
            command,
            attempts,
            policy.max_attempts,
            policy.delay,
            failure.trim()
        );
        timer.wait(policy.delay).await?;
    }
}
