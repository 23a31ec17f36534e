//! Top-level configuration file

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::serde_utils::duration_secs;
use super::Profile;
use crate::error::ConfigError;

/// Contents of `hopshare.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HopshareConfig {
    /// Session registry policy
    pub registry: RegistrySettings,

    /// Transport tuning and host key pins
    pub transport: TransportSettings,

    /// Named tunnel profiles
    pub profiles: BTreeMap<String, Profile>,
}

impl HopshareConfig {
    /// Look up a profile by name
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::Invalid(format!("Unknown profile '{}'", name)))
    }
}

/// Session registry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Never share sessions between consumers, whatever they opt in to
    pub disable_sharing: bool,

    /// Upper bound for graceful transport teardown
    #[serde(with = "duration_secs")]
    pub disconnect_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            disable_sharing: false,
            disconnect_timeout: Duration::from_secs(10),
        }
    }
}

/// Transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// TCP connect + handshake timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Keepalive interval (0 disables keepalives)
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Close the connection after this much inactivity (0 disables)
    #[serde(with = "duration_secs")]
    pub inactivity_timeout: Duration,

    /// Reject hosts whose key is not pinned in `host_keys`
    pub strict_host_keys: bool,

    /// Pinned host key fingerprints, keyed by `host:port`
    pub host_keys: HashMap<String, String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(15),
            inactivity_timeout: Duration::ZERO,
            strict_host_keys: false,
            host_keys: HashMap::new(),
        }
    }
}

impl TransportSettings {
    /// Pinned fingerprint for `host:port`, if any
    pub fn host_key(&self, host: &str, port: u16) -> Option<&str> {
        self.host_keys
            .get(&format!("{}:{}", host, port))
            .map(String::as_str)
    }
}
