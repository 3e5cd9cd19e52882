//! Adapter state tracking.
//!
//! Pure reflection of the radio's power state. Retrying is left to callers;
//! [`AdapterStateTracker::wait_until_ready`] is the polling helper the
//! bootstrap flow uses.

use crate::radio::AdapterState;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Checks logged at info level before an unavailable adapter is reported as an error.
const QUIET_CHECKS: u32 = 3;

/// Shortest pause between checks, whatever the configured retry interval.
const MIN_RECHECK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct AdapterStateTracker {
    state: watch::Receiver<AdapterState>,
}

impl AdapterStateTracker {
    pub fn new(state: watch::Receiver<AdapterState>) -> Self {
        Self { state }
    }

    pub fn current(&self) -> AdapterState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_ready()
    }

    /// Resolve with the new state once the adapter is no longer powered on.
    ///
    /// Resolves immediately if it already is not. Never resolves if the radio
    /// stops reporting state.
    pub async fn lost(&mut self) -> AdapterState {
        let state = self
            .state
            .wait_for(|state| !state.is_ready())
            .await
            .map(|state| *state);
        match state {
            Ok(state) => state,
            Err(_) => std::future::pending().await,
        }
    }

    /// Wait until the adapter is powered on, re-checking every `retry_after`.
    ///
    /// A state change wakes the wait early. There is no upper bound on the
    /// number of checks; persistent unavailability escalates to error logs.
    /// Intervals shorter than 100ms are raised to 100ms.
    pub async fn wait_until_ready(&mut self, retry_after: Duration) {
        let retry_after = retry_after.max(MIN_RECHECK);
        let mut checks = 0u32;
        loop {
            let state = self.current();
            if state.is_ready() {
                debug!("adapter is powered on");
                return;
            }

            checks += 1;
            if checks <= QUIET_CHECKS {
                info!(%state, checks, ?retry_after, "adapter not ready, rechecking");
            } else {
                error!(%state, checks, ?retry_after, "adapter still not ready, rechecking");
            }

            tokio::select! {
                _ = tokio::time::sleep(retry_after) => {}
                changed = self.state.changed() => {
                    if changed.is_err() {
                        // sender gone: keep polling at the fixed interval
                        tokio::time::sleep(retry_after).await;
                    }
                }
            }
        }
    }
}
