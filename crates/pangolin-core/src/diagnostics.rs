//! Diagnostics bridge: file logging, platform log ingestion and power mode
//!
//! The file sink has its own lock, independent of the controller, so a slow
//! disk never stalls tunnel operations. Backend `tracing` events reach the
//! file through [`DiagnosticsLayer`]; platform messages are written directly by
//! [`DiagnosticsBridge::ingest`].

use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::config::LogLevel;
use crate::error::Result;
use crate::power::{PowerMode, PowerState};

/// Timestamp format for every line in the log file
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Prefix of lines ingested from the platform
const PLATFORM_PREFIX: &str = "Android";

fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn level_to_u8(level: LogLevel) -> u8 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warn => 2,
        LogLevel::Error => 3,
    }
}

fn level_from_u8(raw: u8) -> LogLevel {
    match raw {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Shared log file state
struct LogSink {
    file: Mutex<Option<File>>,
    level: AtomicU8,
}

impl LogSink {
    fn new() -> Self {
        Self {
            file: Mutex::new(None),
            level: AtomicU8::new(level_to_u8(LogLevel::Info)),
        }
    }

    fn level(&self) -> LogLevel {
        level_from_u8(self.level.load(Ordering::Relaxed))
    }

    fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Append one line; `Ok` when no file is open
    fn write_line(&self, level: LogLevel, prefix: &str, message: &str) -> std::io::Result<()> {
        let mut guard = self.file.lock();
        match guard.as_mut() {
            Some(file) => {
                writeln!(file, "{} [{}] {}: {}", timestamp(), level.label(), prefix, message)?;
                file.flush()
            }
            None => Ok(()),
        }
    }

    fn close(&self) -> bool {
        let previous = self.file.lock().take();
        match previous {
            Some(mut file) => {
                if let Err(e) = write_marker(&mut file, "Ended") {
                    tracing::warn!("Failed to write log footer: {}", e);
                }
                true
            }
            None => false,
        }
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if let Some(mut file) = self.file.get_mut().take() {
            let _ = write_marker(&mut file, "Ended");
        }
    }
}

fn write_marker(file: &mut File, what: &str) -> std::io::Result<()> {
    writeln!(file, "========== Log Session {}: {} ==========", what, timestamp())?;
    file.flush()
}

/// File logging, platform log ingestion and power mode control
pub struct DiagnosticsBridge {
    sink: Arc<LogSink>,
    power: Arc<PowerState>,
}

impl DiagnosticsBridge {
    /// Create a bridge with file logging disabled
    #[must_use]
    pub fn new(power: Arc<PowerState>) -> Self {
        Self {
            sink: Arc::new(LogSink::new()),
            power,
        }
    }

    /// Start writing logs to `path`, appending if it exists
    ///
    /// A previously enabled file is closed first. On failure the previous
    /// file, if any, stays active.
    pub fn enable_file_logging(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        write_marker(&mut file, "Started")?;

        let previous = self.sink.file.lock().replace(file);
        if let Some(mut old) = previous {
            if let Err(e) = write_marker(&mut old, "Ended") {
                tracing::warn!("Failed to write log footer: {}", e);
            }
        }
        tracing::info!("File logging enabled: {}", path.display());
        Ok(())
    }

    /// Stop writing logs to the file; a no-op when already disabled
    pub fn disable_file_logging(&self) {
        if self.sink.close() {
            tracing::info!("File logging disabled");
        }
    }

    /// Whether a log file is currently open
    #[must_use]
    pub fn is_file_logging_enabled(&self) -> bool {
        self.sink.is_open()
    }

    /// Write a message from the platform layer into the log file
    pub fn ingest(&self, message: &str) {
        if let Err(e) = self.sink.write_line(LogLevel::Info, PLATFORM_PREFIX, message) {
            tracing::warn!("Failed to write platform log line: {}", e);
        }
    }

    /// Decode and apply a power mode string
    pub fn set_power_mode(&self, raw: &str) -> Result<PowerMode> {
        let mode: PowerMode = raw.parse()?;
        let previous = self.power.set(mode);
        if previous != mode {
            tracing::info!("Power mode {} -> {}", previous, mode);
        }
        Ok(mode)
    }

    /// Current power mode
    #[must_use]
    pub fn power_mode(&self) -> PowerMode {
        self.power.mode()
    }

    /// Power state shared with the controller
    #[must_use]
    pub fn power_state(&self) -> Arc<PowerState> {
        Arc::clone(&self.power)
    }

    /// Minimum level of backend events forwarded to the file
    pub fn set_log_level(&self, level: LogLevel) {
        self.sink.level.store(level_to_u8(level), Ordering::Relaxed);
        tracing::debug!("File log level set to {}", level.label());
    }

    /// Current file log level
    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        self.sink.level()
    }

    /// Layer forwarding backend `tracing` events into the log file
    #[must_use]
    pub fn layer(&self) -> DiagnosticsLayer {
        DiagnosticsLayer {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl fmt::Debug for DiagnosticsBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticsBridge")
            .field("file_logging", &self.is_file_logging_enabled())
            .field("log_level", &self.log_level())
            .field("power_mode", &self.power_mode())
            .finish()
    }
}

/// `tracing` layer writing events into the diagnostics log file
#[derive(Clone)]
pub struct DiagnosticsLayer {
    sink: Arc<LogSink>,
}

impl<S: Subscriber> Layer<S> for DiagnosticsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from_tracing(metadata.level());
        if level < self.sink.level() {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        // Failures here would re-enter this layer if logged
        let _ = self
            .sink
            .write_line(level, metadata.target(), &visitor.finish());
    }
}

/// Collects the message and trailing `key=value` fields of an event
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            self.message + &self.fields
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelError;
    use tracing_subscriber::layer::SubscriberExt;

    fn bridge() -> DiagnosticsBridge {
        DiagnosticsBridge::new(Arc::new(PowerState::new()))
    }

    #[test]
    fn test_file_contains_header_lines_and_footer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("olm.log");
        let bridge = bridge();

        bridge.enable_file_logging(&path).unwrap();
        assert!(bridge.is_file_logging_enabled());
        bridge.ingest("hello from the platform");
        bridge.disable_file_logging();
        bridge.disable_file_logging();
        bridge.ingest("dropped");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("========== Log Session Started: "));
        assert!(lines[1].ends_with(" [INFO] Android: hello from the platform"));
        assert!(lines[2].starts_with("========== Log Session Ended: "));
        assert!(!contents.contains("dropped"));
    }

    #[test]
    fn test_reenable_closes_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.log");
        let second = dir.path().join("second.log");
        let bridge = bridge();

        bridge.enable_file_logging(&first).unwrap();
        bridge.enable_file_logging(&second).unwrap();
        bridge.ingest("to second");

        let first = std::fs::read_to_string(&first).unwrap();
        assert!(first.contains("Log Session Ended"));
        assert!(!first.contains("to second"));
        assert!(std::fs::read_to_string(&second).unwrap().contains("to second"));
    }

    #[test]
    fn test_append_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("olm.log");
        let bridge = bridge();

        bridge.enable_file_logging(&path).unwrap();
        bridge.disable_file_logging();
        bridge.enable_file_logging(&path).unwrap();
        bridge.disable_file_logging();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("Log Session Started").count(), 2);
        assert_eq!(contents.matches("Log Session Ended").count(), 2);
    }

    #[test]
    fn test_unwritable_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("olm.log");
        let bridge = bridge();

        let err = bridge.enable_file_logging(&path).unwrap_err();
        assert!(matches!(err, TunnelError::Io(_)));
        assert_eq!(err.code(), "IOError");
        assert!(!bridge.is_file_logging_enabled());
    }

    #[test]
    fn test_drop_writes_footer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("olm.log");
        {
            let bridge = bridge();
            bridge.enable_file_logging(&path).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Log Session Ended"));
    }

    #[test]
    fn test_power_mode() {
        let power = Arc::new(PowerState::new());
        let bridge = DiagnosticsBridge::new(Arc::clone(&power));

        assert_eq!(bridge.set_power_mode(" LOW ").unwrap(), PowerMode::Low);
        assert_eq!(power.mode(), PowerMode::Low);

        let err = bridge.set_power_mode("turbo").unwrap_err();
        assert_eq!(err, TunnelError::UnknownMode("turbo".into()));
        assert_eq!(bridge.power_mode(), PowerMode::Low);

        bridge.set_power_mode("normal").unwrap();
        assert_eq!(power.mode(), PowerMode::Normal);
    }

    #[test]
    fn test_layer_forwards_events_at_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("olm.log");
        let bridge = bridge();
        bridge.enable_file_logging(&path).unwrap();
        bridge.set_log_level(LogLevel::Warn);

        let subscriber = tracing_subscriber::registry().with(bridge.layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("below threshold");
            tracing::warn!(fd = 3, "descriptor {} went away", 3);
            tracing::error!("tunnel failed");
        });
        bridge.disable_file_logging();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("below threshold"));
        assert!(contents.contains("[WARN] pangolin_core::diagnostics::tests: descriptor 3 went away fd=3"));
        assert!(contents.contains("[ERROR] pangolin_core::diagnostics::tests: tunnel failed"));
    }

    #[test]
    fn test_layer_is_silent_without_file() {
        let bridge = bridge();
        let subscriber = tracing_subscriber::registry().with(bridge.layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("nowhere to go");
        });
        assert!(!bridge.is_file_logging_enabled());
    }
}
