//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Mask a host-like value for log output.
///
/// Keeps the first and last character and replaces everything in between
/// with `*`. Values of two characters or fewer are masked completely.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 | 2 => "*".repeat(chars.len()),
        n => {
            let mut masked = String::with_capacity(n);
            masked.push(chars[0]);
            masked.extend(std::iter::repeat('*').take(n - 2));
            masked.push(chars[n - 1]);
            masked
        }
    }
}

/// Opaque identity of a session consumer (a configured data source)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsumerToken(String);

impl ConsumerToken {
    /// Create a token from a stable consumer id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a token with a random unique id
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConsumerToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Authentication material used to log in to a destination
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostAuth {
    /// Password authentication
    Password { password: String },
    /// Private key file, optionally encrypted
    KeyFile {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
    /// Keys resolved through the identity chain
    Agent,
}

impl fmt::Debug for HostAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAuth::Password { .. } => f.write_str("Password(<redacted>)"),
            HostAuth::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("encrypted", &passphrase.is_some())
                .finish(),
            HostAuth::Agent => f.write_str("Agent"),
        }
    }
}

/// A remote endpoint reachable directly or through a tunnel.
///
/// Equality and hashing cover the auth material too, so a consumer only
/// shares a session it could have authenticated itself.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostDestination {
    host: String,
    port: u16,
    username: String,
    auth: HostAuth,
}

impl HostDestination {
    /// Create a new destination
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        auth: HostAuth,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn auth(&self) -> &HostAuth {
        &self.auth
    }

    /// `host:port` for dialing
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Unmasked display string for UI
    pub fn to_display_string(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Masked form, safe for logs
impl fmt::Display for HostDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, mask(&self.host), self.port)
    }
}

impl fmt::Debug for HostDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDestination")
            .field("host", &mask(&self.host))
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth", &self.auth)
            .finish()
    }
}
