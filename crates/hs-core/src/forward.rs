//! Port forward specification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::types::mask;

/// A local→remote forwarding rule.
///
/// Identity is (local_host, remote_host, remote_port). The local port is left
/// out on purpose: callers request `0` to have the OS pick a port, and that
/// unresolved request must still find the stored, resolved entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortForwardSpec {
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl PortForwardSpec {
    /// Create a new forward specification
    pub fn new(
        local_host: impl Into<String>,
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self {
            local_host: local_host.into(),
            local_port,
            remote_host: remote_host.into(),
            remote_port,
        }
    }

    /// Copy of this spec bound to a concrete local port
    pub fn with_local_port(&self, local_port: u16) -> Self {
        Self {
            local_port,
            ..self.clone()
        }
    }

    /// `local_host:local_port` for dialing the forward
    pub fn local_endpoint(&self) -> String {
        format!("{}:{}", self.local_host, self.local_port)
    }

    /// Unmasked form for UI
    pub fn to_display_string(&self) -> String {
        format!(
            "{}:{} <- {}:{}",
            self.local_host, self.local_port, self.remote_host, self.remote_port
        )
    }
}

impl PartialEq for PortForwardSpec {
    fn eq(&self, other: &Self) -> bool {
        self.remote_port == other.remote_port
            && self.local_host == other.local_host
            && self.remote_host == other.remote_host
    }
}

impl Eq for PortForwardSpec {}

impl Hash for PortForwardSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local_host.hash(state);
        self.remote_host.hash(state);
        self.remote_port.hash(state);
    }
}

/// Masked form, safe for logs
impl fmt::Display for PortForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} <- {}:{}",
            mask(&self.local_host),
            self.local_port,
            mask(&self.remote_host),
            self.remote_port
        )
    }
}
