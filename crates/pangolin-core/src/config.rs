//! Tunnel and session configuration
//!
//! Both configurations arrive from the mobile runtime as JSON and are decoded
//! once by [`crate::codec`]. After acceptance they are immutable.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

/// Default tunnel MTU
pub const DEFAULT_MTU: u16 = 1280;

fn default_mtu() -> u16 {
    DEFAULT_MTU
}

fn default_ping_interval() -> u32 {
    10
}

fn default_ping_timeout() -> u32 {
    30
}

/// Configuration for starting a tunnel
///
/// `endpoint`, `id` and `secret` are required; everything else has a default.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
    /// Control plane endpoint
    pub endpoint: String,

    /// Client identifier
    pub id: String,

    /// Client secret
    pub secret: String,

    /// Tunnel interface MTU
    #[serde(default = "default_mtu")]
    pub mtu: u16,

    /// DNS server reachable through the tunnel
    #[serde(default)]
    pub dns: String,

    /// Enable UDP hole punching
    #[serde(default)]
    pub holepunch: bool,

    /// Keepalive ping interval in seconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_seconds: u32,

    /// Keepalive ping timeout in seconds
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_seconds: u32,

    /// User session token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,

    /// Organization identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    /// Upstream resolvers used when overriding system DNS
    #[serde(default, rename = "upstreamDNS")]
    pub upstream_dns: Vec<String>,

    /// Replace the system resolvers with tunnel-provided ones
    #[serde(default, rename = "overrideDNS")]
    pub override_dns: bool,

    /// Send DNS queries to the in-tunnel resolver
    #[serde(default, rename = "tunnelDNS")]
    pub tunnel_dns: bool,
}

impl TunnelConfig {
    /// Check field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(TunnelError::decode("endpoint must not be empty"));
        }
        if self.id.trim().is_empty() {
            return Err(TunnelError::decode("id must not be empty"));
        }
        if self.secret.is_empty() {
            return Err(TunnelError::decode("secret must not be empty"));
        }
        if self.ping_interval_seconds == 0 {
            return Err(TunnelError::decode("pingIntervalSeconds must be positive"));
        }
        if self.ping_timeout_seconds < self.ping_interval_seconds {
            return Err(TunnelError::decode(
                "pingTimeoutSeconds must not be shorter than pingIntervalSeconds",
            ));
        }
        Ok(())
    }

    /// Keepalive ping interval
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.ping_interval_seconds))
    }

    /// Keepalive ping timeout
    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.ping_timeout_seconds))
    }

    /// DNS servers the tunnel should push to the platform
    ///
    /// Nothing is pushed unless `overrideDNS` is set. With `tunnelDNS` the
    /// in-tunnel resolver wins; otherwise the upstream list is used, falling
    /// back to the in-tunnel resolver when the list is empty.
    #[must_use]
    pub fn effective_dns_servers(&self) -> Vec<String> {
        if !self.override_dns {
            return Vec::new();
        }
        let tunnel_dns = || {
            Some(self.dns.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .into_iter()
                .collect::<Vec<_>>()
        };
        if self.tunnel_dns {
            return tunnel_dns();
        }
        let upstream: Vec<String> = self
            .upstream_dns
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if upstream.is_empty() {
            tunnel_dns()
        } else {
            upstream
        }
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("endpoint", &self.endpoint)
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .field("mtu", &self.mtu)
            .field("dns", &self.dns)
            .field("holepunch", &self.holepunch)
            .field("ping_interval_seconds", &self.ping_interval_seconds)
            .field("ping_timeout_seconds", &self.ping_timeout_seconds)
            .field("user_token", &self.user_token.as_ref().map(|_| "[REDACTED]"))
            .field("org_id", &self.org_id)
            .field("upstream_dns", &self.upstream_dns)
            .field("override_dns", &self.override_dns)
            .field("tunnel_dns", &self.tunnel_dns)
            .finish()
    }
}

/// Log levels accepted from the session init config
///
/// Decoding is lenient: names are matched case-insensitively, `trace` maps to
/// `Debug` and anything unrecognized falls back to `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum LogLevel {
    /// Debug level
    Debug,
    /// Info level
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Upper-case label used in log file lines
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Parse a level name, falling back to `Info`
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" | "fatal" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    /// Map a `tracing` level onto the four levels the file sink knows
    #[must_use]
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl From<String> for LogLevel {
    fn from(name: String) -> Self {
        LogLevel::from_name(&name)
    }
}

/// Configuration for Olm session initialization
///
/// Every field is optional; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitConfig {
    /// Expose the local control API
    #[serde(rename = "enableAPI")]
    pub enable_api: bool,

    /// Path of the local control API socket
    pub socket_path: String,

    /// Minimum level for backend log output
    pub log_level: LogLevel,

    /// Client application version
    pub version: String,

    /// Client agent string
    pub agent: String,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            enable_api: true,
            socket_path: String::new(),
            log_level: LogLevel::Info,
            version: String::new(),
            agent: "android".to_string(),
        }
    }
}
