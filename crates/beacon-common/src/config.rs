//! Framework configuration.
//!
//! Configuration is a flat set of `key=value` properties, loaded from an
//! optional file and overridable programmatically. Unknown keys are kept but
//! ignored; the two legacy `use.simple.json` switches parse and are ignored
//! because the framed JSON codec is the only wire form.

use std::collections::HashMap;
use std::path::Path;

use crate::net;
use crate::protocol::error::{Result, RpcError};

/// Registry endpoint; construction fails when missing.
pub const KEY_REGISTRY_ADDRESS: &str = "rpc.registry.address";
/// Provider bind IP; defaults to the auto-detected LAN address.
pub const KEY_SERVER_IP: &str = "rpc.server.ip";
/// Provider listen port; defaults to 9000.
pub const KEY_SERVER_PORT: &str = "rpc.server.port";
/// Default consumer call timeout in milliseconds; defaults to 5000.
pub const KEY_CLIENT_TIMEOUT: &str = "rpc.client.timeout";

pub const DEFAULT_SERVER_PORT: u16 = 9000;
pub const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Default)]
pub struct Config {
    properties: HashMap<String, String>,
}

impl Config {
    /// An empty configuration; every getter answers its default.
    pub fn new() -> Self {
        Config::default()
    }

    /// Parses `key=value` lines. Blank lines and lines starting with `#` or
    /// `!` are skipped; keys and values are trimmed.
    pub fn from_str(text: &str) -> Self {
        let mut properties = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                properties.insert(key.trim().to_string(), value.trim().to_string());
            } else {
                tracing::warn!(line, "ignoring malformed config line");
            }
        }
        Config { properties }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(RpcError::Io)?;
        Ok(Self::from_str(&text))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(key, raw, "invalid integer config value, using default");
                default
            }),
        }
    }

    pub fn get_u16(&self, key: &str, default: u16) -> u16 {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(key, raw, "invalid port config value, using default");
                default
            }),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or(default),
        }
    }

    /// The registry `host:port`; the one required setting.
    pub fn registry_address(&self) -> Result<String> {
        match self.get(KEY_REGISTRY_ADDRESS) {
            Some(addr) if !addr.is_empty() => Ok(addr.to_string()),
            _ => Err(RpcError::Protocol(format!(
                "missing required config key {KEY_REGISTRY_ADDRESS}"
            ))),
        }
    }

    pub fn server_ip(&self) -> String {
        match self.get(KEY_SERVER_IP) {
            Some(ip) if !ip.is_empty() => ip.to_string(),
            _ => net::local_ip(),
        }
    }

    pub fn server_port(&self) -> u16 {
        self.get_u16(KEY_SERVER_PORT, DEFAULT_SERVER_PORT)
    }

    pub fn client_timeout_ms(&self) -> u64 {
        self.get_u64(KEY_CLIENT_TIMEOUT, DEFAULT_CLIENT_TIMEOUT_MS)
    }
}
