//! # Pangolin Core
//!
//! Control surface of the Pangolin tunnel backend embedded in the mobile
//! client. The platform VPN layer drives it through a handful of string
//! operations; this crate owns the state behind them.
//!
//! This crate provides:
//! - Tunnel lifecycle state machine bound to a platform descriptor
//! - Olm session initialization (independent of the tunnel)
//! - Device registry for the running tunnel
//! - Versioned network settings with a poll-based consumer
//! - File logging, platform log ingestion and power mode control
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Backend                                 │
//! │   (string boundary: one method per exported operation)          │
//! ├────────────────────────────────────┬────────────────────────────┤
//! │          TunnelController          │      DiagnosticsBridge     │
//! │  (state machine, session, devices) │  (log file, power mode)    │
//! ├────────────────────────────────────┼────────────────────────────┤
//! │        NetworkSettingsStore        │         PowerState         │
//! │   (versioned snapshots, polled)    │ (shared by both sides)     │
//! └────────────────────────────────────┴────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod codec;
pub mod config;
pub mod controller;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod handle;
pub mod power;
pub mod session;
pub mod settings;

pub use backend::Backend;
pub use config::{InitConfig, LogLevel, TunnelConfig};
pub use controller::{TunnelController, TunnelState, TunnelStatus};
pub use device::{Device, DeviceId, DeviceRegistry};
pub use diagnostics::{DiagnosticsBridge, DiagnosticsLayer};
pub use error::{Result, TunnelError};
pub use handle::{RawDescriptor, TunnelHandle};
pub use power::{PowerMode, PowerState};
pub use session::{SessionHandle, SessionManager, SessionStatus};
pub use settings::{
    NetworkSettings, NetworkSettingsStore, NetworkUpdate, SettingsPoller, SettingsSnapshot,
};
