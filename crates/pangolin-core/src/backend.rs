//! String boundary used by the mobile runtime glue
//!
//! One method per exported operation. Failures come back as
//! `Some("Error: <Code>: <description>")`, success as `None`; the platform
//! side only checks for the `Error:` prefix.

use std::sync::Arc;

use crate::codec;
use crate::controller::TunnelController;
use crate::diagnostics::{DiagnosticsBridge, DiagnosticsLayer};
use crate::error::{Result, TunnelError};
use crate::handle::RawDescriptor;
use crate::power::PowerState;

/// Prefix of every error string returned across the boundary
pub const ERROR_PREFIX: &str = "Error:";

/// Render an error for the boundary
#[must_use]
pub fn error_string(err: &TunnelError) -> String {
    format!("{} {}: {}", ERROR_PREFIX, err.code(), err)
}

/// Console output filtered by `console_filter`, file output by the sink's own level
fn layered_subscriber(
    diagnostics: DiagnosticsLayer,
    console_filter: tracing_subscriber::EnvFilter,
) -> impl tracing::Subscriber + Send + Sync {
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::SubscriberExt;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(console_filter))
        .with(diagnostics)
}

fn outcome<T>(result: Result<T>) -> Option<String> {
    match result {
        Ok(_) => None,
        Err(e) => Some(error_string(&e)),
    }
}

/// Backend instance owning one controller and one diagnostics bridge
#[derive(Debug)]
pub struct Backend {
    controller: TunnelController,
    diagnostics: DiagnosticsBridge,
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend {
    /// Create an idle backend with file logging disabled and normal power mode
    #[must_use]
    pub fn new() -> Self {
        let power = Arc::new(PowerState::new());
        Self {
            controller: TunnelController::new(Arc::clone(&power)),
            diagnostics: DiagnosticsBridge::new(power),
        }
    }

    /// Install the global `tracing` subscriber
    ///
    /// Console output filtered by `RUST_LOG` (default `info`), plus this
    /// backend's file sink at the session log level. Safe to call more than
    /// once; only the first subscriber wins.
    pub fn install_tracing(&self) {
        self.install_tracing_with_default("info");
    }

    /// Like [`install_tracing`](Self::install_tracing) with a different
    /// fallback filter when `RUST_LOG` is unset
    pub fn install_tracing_with_default(&self, default_filter: &str) {
        use tracing_subscriber::util::SubscriberInitExt;

        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
        let _ = layered_subscriber(self.diagnostics.layer(), filter).try_init();
    }

    /// Tunnel controller
    #[must_use]
    pub fn controller(&self) -> &TunnelController {
        &self.controller
    }

    /// Diagnostics bridge
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticsBridge {
        &self.diagnostics
    }

    /// Initialize the Olm session from a JSON init config
    ///
    /// The config's log level becomes the file log level.
    pub fn init_session(&self, config_json: &str) -> Option<String> {
        outcome(self.controller.init_session(config_json).map(|handle| {
            self.diagnostics.set_log_level(handle.log_level);
        }))
    }

    /// Start the tunnel on `fd`
    pub fn start_tunnel(&self, fd: RawDescriptor, config_json: &str) -> Option<String> {
        outcome(self.controller.start(fd, config_json))
    }

    /// Register a device descriptor with the running tunnel
    pub fn add_device(&self, fd: RawDescriptor) -> Option<String> {
        outcome(self.controller.add_device(fd))
    }

    /// Stop the tunnel; succeeds when already stopped
    pub fn stop_tunnel(&self) -> Option<String> {
        outcome(self.controller.stop())
    }

    /// Current settings version, 0 before the first commit
    #[must_use]
    pub fn network_settings_version(&self) -> i64 {
        i64::try_from(self.controller.current_version()).unwrap_or(i64::MAX)
    }

    /// JSON of the latest committed settings, `None` before the first commit
    #[must_use]
    pub fn network_settings(&self) -> Option<String> {
        self.controller
            .current_snapshot()
            .map(|snapshot| codec::encode_settings(&snapshot.settings))
    }

    /// Start appending logs to the file at `path`
    pub fn enable_file_logging(&self, path: &str) -> Option<String> {
        outcome(self.diagnostics.enable_file_logging(path))
    }

    /// Stop file logging; always succeeds
    pub fn disable_file_logging(&self) -> Option<String> {
        self.diagnostics.disable_file_logging();
        None
    }

    /// Write a platform log line into the log file
    pub fn log_from_android(&self, message: &str) {
        self.diagnostics.ingest(message);
    }

    /// Switch between `"normal"` and `"low"` power modes
    pub fn set_power_mode(&self, mode: &str) -> Option<String> {
        outcome(self.diagnostics.set_power_mode(mode))
    }
}
