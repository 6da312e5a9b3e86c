//! Versioned network settings store
//!
//! Holds the latest committed [`NetworkSettings`] together with a version
//! counter. The pair lives in one `Arc`, so a reader always sees a version and
//! the payload it was committed with. Readers hold the lock only long enough
//! to clone the `Arc`.

use std::sync::Arc;

use parking_lot::RwLock;

use super::NetworkSettings;

/// Committed settings paired with the version they were committed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSnapshot {
    /// Commit version, starting at 1
    pub version: u64,
    /// Settings payload
    pub settings: NetworkSettings,
}

/// Store of the current network settings
#[derive(Debug, Default)]
pub struct NetworkSettingsStore {
    /// `None` until the first commit
    current: RwLock<Option<Arc<SettingsSnapshot>>>,
}

impl NetworkSettingsStore {
    /// Create an empty store (version 0)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed version, 0 before any commit
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.current.read().as_ref().map_or(0, |s| s.version)
    }

    /// Latest committed snapshot
    #[must_use]
    pub fn current_snapshot(&self) -> Option<Arc<SettingsSnapshot>> {
        self.current.read().clone()
    }

    /// Replace the settings and bump the version
    ///
    /// The version increments even if `settings` equals the current payload.
    /// Returns the new version.
    pub(crate) fn commit(&self, settings: NetworkSettings) -> u64 {
        let mut current = self.current.write();
        let version = current.as_ref().map_or(0, |s| s.version) + 1;
        *current = Some(Arc::new(SettingsSnapshot { version, settings }));
        tracing::debug!("Committed network settings version {}", version);
        version
    }
}
