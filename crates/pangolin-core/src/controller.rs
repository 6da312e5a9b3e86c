//! Tunnel lifecycle state machine
//!
//! ```text
//!            start                      (success)
//!   Idle ------------> Starting --------------------> Running
//!    ^                    |                              |
//!    |   (failure, rolled back)                          | stop
//!    +--------------------+                              v
//!    +------------------------------------------------ Stopping
//! ```
//!
//! Every mutating operation runs under one controller mutex, so `Starting` and
//! `Stopping` are never observable from another thread: a concurrent `start`
//! sees either `Idle` or `Running`. Settings reads bypass the mutex and go
//! straight to the [`NetworkSettingsStore`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::codec;
use crate::config::TunnelConfig;
use crate::device::{Device, DeviceId, DeviceRegistry};
use crate::error::{Result, TunnelError};
use crate::handle::{RawDescriptor, TunnelHandle};
use crate::power::PowerState;
use crate::session::{SessionHandle, SessionManager};
use crate::settings::{NetworkSettings, NetworkSettingsStore, NetworkUpdate, SettingsSnapshot};

/// Lifecycle state of the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TunnelState {
    /// No tunnel; the only state `start` is accepted in
    #[default]
    Idle,
    /// Descriptor acquired, session and settings being bound
    Starting,
    /// Tunnel up; devices and settings updates accepted
    Running,
    /// Tearing down
    Stopping,
}

impl TunnelState {
    /// Whether `self -> next` is an edge of the state machine
    #[must_use]
    pub fn can_transition_to(self, next: TunnelState) -> bool {
        matches!(
            (self, next),
            (TunnelState::Idle, TunnelState::Starting)
                | (TunnelState::Starting, TunnelState::Running)
                | (TunnelState::Starting, TunnelState::Idle)
                | (TunnelState::Starting, TunnelState::Stopping)
                | (TunnelState::Running, TunnelState::Stopping)
                | (TunnelState::Stopping, TunnelState::Idle)
        )
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TunnelState::Idle => "Idle",
            TunnelState::Starting => "Starting",
            TunnelState::Running => "Running",
            TunnelState::Stopping => "Stopping",
        };
        f.write_str(name)
    }
}

/// Callback invoked with `(from, to)` on every state transition
///
/// Runs while the controller lock is held; it must not call back into the
/// controller.
pub type StateChangeCallback = Box<dyn Fn(TunnelState, TunnelState) + Send + Sync>;

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStatus {
    /// Current state
    pub state: TunnelState,
    /// Descriptor backing the tunnel, if any
    pub fd: Option<RawDescriptor>,
    /// Number of registered devices
    pub device_count: usize,
    /// Active session, if initialized
    pub session: Option<SessionHandle>,
    /// Current settings version
    pub settings_version: u64,
    /// Keepalive cadence after power mode scaling, while a tunnel is configured
    pub keepalive_interval: Option<Duration>,
}

/// State guarded by the controller mutex
#[derive(Default)]
struct ControllerState {
    state: TunnelState,
    handle: Option<TunnelHandle>,
    session: SessionManager,
    devices: DeviceRegistry,
    config: Option<TunnelConfig>,
    on_state_change: Option<StateChangeCallback>,
}

impl ControllerState {
    fn transition(&mut self, next: TunnelState) {
        let previous = self.state;
        debug_assert!(
            previous.can_transition_to(next),
            "illegal transition {previous} -> {next}"
        );
        self.state = next;
        tracing::info!("Tunnel state {} -> {}", previous, next);
        if let Some(callback) = &self.on_state_change {
            callback(previous, next);
        }
    }

    /// Undo a partial start
    fn roll_back(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
        self.devices.clear();
        self.config = None;
        self.transition(TunnelState::Idle);
    }
}

/// Owns the tunnel lifecycle, the session and the device registry
pub struct TunnelController {
    inner: Mutex<ControllerState>,
    settings: Arc<NetworkSettingsStore>,
    power: Arc<PowerState>,
}

impl TunnelController {
    /// Create an idle controller sharing `power` with the diagnostics bridge
    #[must_use]
    pub fn new(power: Arc<PowerState>) -> Self {
        Self {
            inner: Mutex::new(ControllerState::default()),
            settings: Arc::new(NetworkSettingsStore::new()),
            power,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TunnelState {
        self.inner.lock().state
    }

    /// Register a callback for state transitions, replacing any previous one
    pub fn on_state_change(&self, callback: StateChangeCallback) {
        self.inner.lock().on_state_change = Some(callback);
    }

    /// Decode `raw` and initialize the Olm session
    pub fn init_session(&self, raw: &str) -> Result<SessionHandle> {
        let config = codec::decode_init_config(raw)?;
        self.inner.lock().session.init_session(config)
    }

    /// Tear the session down; only allowed while no tunnel exists
    ///
    /// Returns true if a session existed.
    pub fn reset_session(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.state != TunnelState::Idle {
            return Err(TunnelError::invalid_state("reset session", inner.state));
        }
        Ok(inner.session.reset())
    }

    /// Start the tunnel on `fd` with the JSON configuration `raw`
    ///
    /// All-or-nothing: on any failure the handle is released, the registry is
    /// closed and the controller is back in `Idle` with no settings committed.
    pub fn start(&self, fd: RawDescriptor, raw: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != TunnelState::Idle {
            return Err(TunnelError::invalid_state("start tunnel", inner.state));
        }

        let config = codec::decode_tunnel_config(raw)?;
        inner.transition(TunnelState::Starting);

        match self.bind(&mut inner, fd, config) {
            Ok(version) => {
                inner.transition(TunnelState::Running);
                tracing::info!("Tunnel running on descriptor {} (settings v{})", fd, version);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Tunnel start failed, rolling back: {}", e);
                inner.roll_back();
                Err(e)
            }
        }
    }

    /// The fallible part of `start`, run in `Starting`
    fn bind(
        &self,
        inner: &mut ControllerState,
        fd: RawDescriptor,
        config: TunnelConfig,
    ) -> Result<u64> {
        inner.handle = Some(TunnelHandle::acquire(fd)?);

        let session = inner.session.handle().ok_or(TunnelError::SessionNotReady)?;
        tracing::debug!(
            "Binding tunnel {} to session {}",
            config.id,
            session.short_fingerprint()
        );

        inner.devices.open();
        let version = self.settings.commit(initial_settings(&config));
        inner.config = Some(config);
        Ok(version)
    }

    /// Stop the tunnel; a no-op when already idle
    ///
    /// The session survives a stop.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            TunnelState::Idle => {
                tracing::debug!("Stop requested while idle");
                Ok(())
            }
            TunnelState::Starting | TunnelState::Running => {
                inner.transition(TunnelState::Stopping);
                if let Some(handle) = inner.handle.take() {
                    handle.release();
                }
                inner.devices.clear();
                inner.config = None;
                inner.transition(TunnelState::Idle);
                Ok(())
            }
            TunnelState::Stopping => Err(TunnelError::invalid_state("stop tunnel", inner.state)),
        }
    }

    /// Register the device behind `fd` with the running tunnel
    ///
    /// Does not commit new settings.
    pub fn add_device(&self, fd: RawDescriptor) -> Result<DeviceId> {
        self.inner.lock().devices.add(fd)
    }

    /// Merge a control plane update into the current settings and commit it
    pub fn apply_network_update(&self, update: NetworkUpdate) -> Result<u64> {
        let inner = self.inner.lock();
        if inner.state != TunnelState::Running {
            return Err(TunnelError::invalid_state("apply network update", inner.state));
        }

        let mut settings = self
            .settings
            .current_snapshot()
            .map(|s| s.settings.clone())
            .unwrap_or_default();
        settings.apply(update);
        let version = self.settings.commit(settings);
        tracing::info!("Committed network settings v{}", version);
        Ok(version)
    }

    /// Registered devices ordered by identifier
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.inner.lock().devices.devices()
    }

    /// Handle of the current session
    #[must_use]
    pub fn session(&self) -> Option<SessionHandle> {
        self.inner.lock().session.handle().cloned()
    }

    /// Snapshot of the controller
    #[must_use]
    pub fn status(&self) -> TunnelStatus {
        let inner = self.inner.lock();
        let mode = self.power.mode();
        TunnelStatus {
            state: inner.state,
            fd: inner.handle.as_ref().map(TunnelHandle::fd),
            device_count: inner.devices.len(),
            session: inner.session.handle().cloned(),
            settings_version: self.settings.current_version(),
            keepalive_interval: inner
                .config
                .as_ref()
                .map(|c| mode.keepalive_interval(c.ping_interval())),
        }
    }

    /// Shared settings store, for pollers
    #[must_use]
    pub fn settings(&self) -> &Arc<NetworkSettingsStore> {
        &self.settings
    }

    /// Current settings version; 0 before any commit
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.settings.current_version()
    }

    /// Latest committed settings
    #[must_use]
    pub fn current_snapshot(&self) -> Option<Arc<SettingsSnapshot>> {
        self.settings.current_snapshot()
    }
}

impl fmt::Debug for TunnelController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelController")
            .field("state", &self.state())
            .field("settings_version", &self.settings.current_version())
            .finish_non_exhaustive()
    }
}

/// Settings committed when the tunnel comes up
fn initial_settings(config: &TunnelConfig) -> NetworkSettings {
    NetworkSettings {
        tunnel_remote_address: Some(config.endpoint.clone()),
        mtu: Some(config.mtu),
        dns_servers: config.effective_dns_servers(),
        ..NetworkSettings::default()
    }
}
