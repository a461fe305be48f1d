//! Background sweep of expired credentials.
//!
//! Each manager owns one [`Sweeper`]. It is `Running` from construction until
//! the first `stop`/`shutdown` and `Stopped` afterwards; both calls are safe
//! to repeat.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{CredentialRecord, CredentialStore};

enum SweeperState {
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
    Stopped,
}

pub struct Sweeper {
    label: &'static str,
    state: Mutex<SweeperState>,
}

impl Sweeper {
    /// A sweeper that never ran. Used when no runtime is available or the
    /// interval is zero.
    pub fn stopped(label: &'static str) -> Self {
        Self {
            label,
            state: Mutex::new(SweeperState::Stopped),
        }
    }

    /// Start sweeping `store` every `interval` on the current tokio runtime.
    pub fn spawn<R: CredentialRecord>(
        label: &'static str,
        store: Arc<CredentialStore<R>>,
        interval: Duration,
    ) -> Self {
        if interval.is_zero() {
            debug!(sweeper = label, "sweep interval is zero; background sweep disabled");
            return Self::stopped(label);
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!(
                    sweeper = label,
                    "no tokio runtime at construction; background sweep disabled"
                );
                return Self::stopped(label);
            }
        };

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run(label, store, interval, cancel.clone()));
        info!(
            sweeper = label,
            interval_ms = interval.as_millis() as u64,
            "credential sweeper started"
        );
        Self {
            label,
            state: Mutex::new(SweeperState::Running { cancel, handle }),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            SweeperState::Running { .. }
        )
    }

    fn take(&self) -> SweeperState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, SweeperState::Stopped)
    }

    /// Signal the task to exit without waiting for it. Returns `false` when
    /// already stopped.
    pub fn stop(&self) -> bool {
        match self.take() {
            SweeperState::Running { cancel, .. } => {
                cancel.cancel();
                debug!(sweeper = self.label, "credential sweeper stop requested");
                true
            }
            SweeperState::Stopped => false,
        }
    }

    /// Signal the task and wait until it has exited.
    pub async fn shutdown(&self) {
        if let SweeperState::Running { cancel, handle } = self.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(sweeper = self.label, error = %e, "credential sweeper task failed");
            }
            info!(sweeper = self.label, "credential sweeper stopped");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run<R: CredentialRecord>(
    label: &'static str,
    store: Arc<CredentialStore<R>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; the first sweep happens one interval in.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(sweeper = label, "credential sweeper exiting");
                return;
            }
            _ = ticker.tick() => {
                let removed = store.sweep_expired(Utc::now());
                if removed > 0 {
                    info!(sweeper = label, removed, "swept expired credentials");
                } else {
                    debug!(sweeper = label, "sweep found nothing to remove");
                }
            }
        }
    }
}
