//! Devices registered against the active tunnel
//!
//! The platform hands the backend a fresh descriptor whenever it rebuilds the
//! VPN interface (new routes, new addresses). Each one is registered here,
//! keyed by an identity derived from the descriptor. The registry only accepts
//! devices while the controller has it open (tunnel starting or running) and
//! is emptied when the tunnel stops.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use crate::error::{Result, TunnelError};
use crate::handle::RawDescriptor;

/// Stable identifier assigned on registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Numeric value
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev-{}", self.0)
    }
}

/// Identity of a device as derived from its descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(RawDescriptor);

impl DeviceIdentity {
    /// Derive the identity for `fd`
    pub fn from_descriptor(fd: RawDescriptor) -> Result<Self> {
        if fd < 0 {
            return Err(TunnelError::InvalidDescriptor(fd));
        }
        Ok(Self(fd))
    }

    /// Descriptor the identity was derived from
    #[must_use]
    pub fn descriptor(self) -> RawDescriptor {
        self.0
    }
}

/// A registered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Assigned identifier
    pub id: DeviceId,
    /// Derived identity
    pub identity: DeviceIdentity,
    /// Registration time
    pub added_at: SystemTime,
    /// Descriptor the device was registered with
    pub fd: RawDescriptor,
}

/// Registry of devices for the active tunnel
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceIdentity, Device>,
    open: bool,
    next_id: u64,
}

impl DeviceRegistry {
    /// Create a closed, empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting devices
    pub(crate) fn open(&mut self) {
        self.open = true;
    }

    /// Whether devices can currently be added
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Register the device behind `fd`
    pub fn add(&mut self, fd: RawDescriptor) -> Result<DeviceId> {
        if !self.open {
            return Err(TunnelError::NotRunning);
        }
        let identity = DeviceIdentity::from_descriptor(fd)?;
        if self.devices.contains_key(&identity) {
            return Err(TunnelError::DuplicateDevice(fd));
        }

        self.next_id += 1;
        let id = DeviceId(self.next_id);
        self.devices.insert(
            identity,
            Device {
                id,
                identity,
                added_at: SystemTime::now(),
                fd,
            },
        );
        tracing::info!("Added device {} for descriptor {}", id, fd);
        Ok(id)
    }

    /// Remove every device and stop accepting new ones
    ///
    /// Identifiers are not reused after a clear.
    pub(crate) fn clear(&mut self) {
        let removed = self.devices.len();
        for device in self.devices.drain().map(|(_, d)| d) {
            tracing::debug!("Removed device {} (descriptor {})", device.id, device.fd);
        }
        self.open = false;
        if removed > 0 {
            tracing::info!("Cleared {} device(s)", removed);
        }
    }

    /// Number of registered devices
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no devices are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Registered devices ordered by identifier
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.id);
        devices
    }
}
