//! Consumer-side long-poll over the settings version
//!
//! The platform layer never receives pushes. It compares the store's version
//! against the last version it applied and fetches the payload only when the
//! version moved forward.

use std::sync::Arc;

use tokio::sync::watch;

use super::{NetworkSettingsStore, SettingsSnapshot};
use crate::power::PowerState;

/// Consecutive callback failures after which [`SettingsPoller::run`] gives up
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Why a poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// Shutdown was signalled
    Shutdown,
    /// The update callback failed too many times in a row
    TooManyErrors,
}

/// Tracks the last settings version handed to the platform
#[derive(Debug, Default)]
pub struct SettingsPoller {
    last_seen: u64,
    consecutive_errors: u32,
}

impl SettingsPoller {
    /// Create a poller that has seen nothing yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last version returned by [`poll`](Self::poll)
    #[must_use]
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Forget the last seen version so the next poll reports the current snapshot
    pub fn reset(&mut self) {
        self.last_seen = 0;
        self.consecutive_errors = 0;
    }

    /// Return the current snapshot if it is newer than the last one seen
    pub fn poll(&mut self, store: &NetworkSettingsStore) -> Option<Arc<SettingsSnapshot>> {
        if store.current_version() <= self.last_seen {
            return None;
        }
        let snapshot = store.current_snapshot()?;
        if snapshot.version <= self.last_seen {
            return None;
        }
        self.last_seen = snapshot.version;
        Some(snapshot)
    }

    /// Poll until shutdown, invoking `on_update` for every newer snapshot
    ///
    /// Runs every [`PowerMode::poll_interval`](crate::power::PowerMode::poll_interval)
    /// and skips polling entirely while the device is in low power mode.
    pub async fn run<F, E>(
        mut self,
        store: Arc<NetworkSettingsStore>,
        power: Arc<PowerState>,
        mut shutdown: watch::Receiver<bool>,
        mut on_update: F,
    ) -> PollExit
    where
        F: FnMut(&SettingsSnapshot) -> Result<(), E>,
        E: std::fmt::Display,
    {
        tracing::debug!("Starting network settings polling");
        loop {
            if *shutdown.borrow() {
                return PollExit::Shutdown;
            }

            let mode = power.mode();
            if mode.polls_settings() {
                if let Some(snapshot) = self.poll(&store) {
                    match on_update(&snapshot) {
                        Ok(()) => self.consecutive_errors = 0,
                        Err(e) => {
                            self.consecutive_errors += 1;
                            tracing::error!(
                                "Applying settings version {} failed (attempt {}): {}",
                                snapshot.version,
                                self.consecutive_errors,
                                e
                            );
                            if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                tracing::error!("Too many consecutive errors, stopping poller");
                                return PollExit::TooManyErrors;
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(mode.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return PollExit::Shutdown;
                    }
                }
            }
        }
    }
}
