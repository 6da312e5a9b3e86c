//! JSON codec for caller configuration and settings snapshots
//!
//! Decoding is all-or-nothing: the value is parsed and validated before
//! anything else sees it.

use crate::config::{InitConfig, TunnelConfig};
use crate::error::Result;
use crate::settings::NetworkSettings;

/// Decode and validate a tunnel start configuration
pub fn decode_tunnel_config(raw: &str) -> Result<TunnelConfig> {
    let config: TunnelConfig = serde_json::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Decode a session init configuration
///
/// Every field is optional, so any JSON object is accepted.
pub fn decode_init_config(raw: &str) -> Result<InitConfig> {
    Ok(serde_json::from_str(raw)?)
}

/// Serialize a settings payload
pub fn encode_settings(settings: &NetworkSettings) -> String {
    // Plain structs with string keys cannot fail to serialize
    serde_json::to_string(settings).unwrap_or_else(|_| String::from("{}"))
}

/// Decode a settings payload produced by [`encode_settings`]
pub fn decode_settings(raw: &str) -> Result<NetworkSettings> {
    Ok(serde_json::from_str(raw)?)
}
