//! Tunnel profile configuration

use serde::{Deserialize, Serialize};

use super::expand_home;
use crate::error::ConfigError;
use crate::forward::PortForwardSpec;
use crate::handler::HandlerConfig;
use crate::types::{ConsumerToken, HostAuth, HostDestination};

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    whoami::username()
}

fn default_auth() -> HostAuth {
    HostAuth::Agent
}

fn default_local_host() -> String {
    crate::LOCAL_HOST.to_string()
}

fn default_true() -> bool {
    true
}

/// A named chain of hops plus an optional forward at the far end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Consumer id used for session sharing (defaults to the profile name)
    #[serde(default)]
    pub consumer: Option<String>,

    /// Opt in to sharing sessions with other consumers
    #[serde(default = "default_true")]
    pub share_tunnels: bool,

    /// Hops in connection order; the first is dialed directly
    pub hops: Vec<HopConfig>,

    /// Forward opened on the final hop
    #[serde(default)]
    pub forward: Option<ForwardConfig>,
}

/// One host in a profile's chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_auth")]
    pub auth: HostAuth,
}

/// A forward request; `local_port = 0` asks for an OS-assigned port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    #[serde(default = "default_local_host")]
    pub local_host: String,

    #[serde(default)]
    pub local_port: u16,

    pub remote_host: String,

    pub remote_port: u16,
}

impl Profile {
    /// Handler configuration for this profile's consumer
    pub fn handler_config(&self, profile_name: &str) -> HandlerConfig {
        let consumer = self.consumer.as_deref().unwrap_or(profile_name);
        HandlerConfig::new(ConsumerToken::new(consumer)).with_share_tunnels(self.share_tunnels)
    }

    /// Destinations of every hop, in order
    pub fn destinations(&self) -> Result<Vec<HostDestination>, ConfigError> {
        if self.hops.is_empty() {
            return Err(ConfigError::MissingField("hops".to_string()));
        }
        self.hops.iter().map(HopConfig::destination).collect()
    }

    /// Forward spec requested on the final hop
    pub fn forward_spec(&self) -> Option<PortForwardSpec> {
        self.forward.as_ref().map(|f| {
            PortForwardSpec::new(
                f.local_host.clone(),
                f.local_port,
                f.remote_host.clone(),
                f.remote_port,
            )
        })
    }
}

impl HopConfig {
    /// Destination for this hop, with `~` expanded in key paths
    pub fn destination(&self) -> Result<HostDestination, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("host".to_string()));
        }
        let auth = match &self.auth {
            HostAuth::KeyFile { path, passphrase } => HostAuth::KeyFile {
                path: expand_home(path),
                passphrase: passphrase.clone(),
            },
            other => other.clone(),
        };
        Ok(HostDestination::new(
            self.host.clone(),
            self.port,
            self.username.clone(),
            auth,
        ))
    }
}
