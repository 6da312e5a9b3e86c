//! Power mode shared by the controller, the settings poller and diagnostics

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::error::TunnelError;

/// Settings poll interval in normal mode
pub const NORMAL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often a paused poller re-checks the power mode
pub const LOW_POWER_RECHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Keepalive interval multiplier in low power mode
pub const LOW_POWER_KEEPALIVE_FACTOR: u32 = 4;

/// Operating profile for background work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerMode {
    /// Full cadence
    #[default]
    Normal,
    /// Device is dozing or in battery saver; back off background work
    Low,
}

impl PowerMode {
    /// Boundary name of the mode
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PowerMode::Normal => "normal",
            PowerMode::Low => "low",
        }
    }

    /// Whether settings polling should run at all
    #[must_use]
    pub fn polls_settings(self) -> bool {
        matches!(self, PowerMode::Normal)
    }

    /// Delay before the poller looks at the store (or the mode) again
    #[must_use]
    pub fn poll_interval(self) -> Duration {
        match self {
            PowerMode::Normal => NORMAL_POLL_INTERVAL,
            PowerMode::Low => LOW_POWER_RECHECK_INTERVAL,
        }
    }

    /// Keepalive interval derived from the configured ping interval
    #[must_use]
    pub fn keepalive_interval(self, configured: Duration) -> Duration {
        match self {
            PowerMode::Normal => configured,
            PowerMode::Low => configured.saturating_mul(LOW_POWER_KEEPALIVE_FACTOR),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            PowerMode::Normal => 0,
            PowerMode::Low => 1,
        }
    }

    fn from_u8(raw: u8) -> Self {
        if raw == 1 {
            PowerMode::Low
        } else {
            PowerMode::Normal
        }
    }
}

impl FromStr for PowerMode {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(PowerMode::Normal),
            "low" => Ok(PowerMode::Low),
            _ => Err(TunnelError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide power mode cell
///
/// Lock-free so background loops can read it on every tick.
#[derive(Debug, Default)]
pub struct PowerState {
    mode: AtomicU8,
}

impl PowerState {
    /// Create a cell in normal mode
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode
    #[must_use]
    pub fn mode(&self) -> PowerMode {
        PowerMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Switch mode, returning the previous one
    pub fn set(&self, mode: PowerMode) -> PowerMode {
        PowerMode::from_u8(self.mode.swap(mode.to_u8(), Ordering::AcqRel))
    }
}
