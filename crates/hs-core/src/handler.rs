//! Consumer-side handler configuration

use dashmap::DashMap;
use std::sync::Arc;

use crate::types::ConsumerToken;

/// Property through which a jump hop publishes its resolved local port
pub const PROP_JUMP_LOCAL_PORT: &str = "jump.local_port";

/// Configuration a consumer hands to every session operation.
///
/// Clones share the property bag, so a value published by a session during
/// `connect` is visible to every holder of the configuration.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Consumer owning this configuration (None for connection tests)
    consumer: Option<ConsumerToken>,
    /// Whether this consumer opts in to shared tunnels
    share_tunnels: bool,
    /// Values published by sessions for downstream consumers
    properties: Arc<DashMap<String, String>>,
}

impl HandlerConfig {
    /// Create a configuration owned by `consumer`, sharing enabled
    pub fn new(consumer: ConsumerToken) -> Self {
        Self {
            consumer: Some(consumer),
            share_tunnels: true,
            properties: Arc::new(DashMap::new()),
        }
    }

    /// Create a configuration with no owning consumer
    pub fn anonymous() -> Self {
        Self {
            consumer: None,
            share_tunnels: true,
            properties: Arc::new(DashMap::new()),
        }
    }

    /// Set the sharing opt-in
    pub fn with_share_tunnels(mut self, share: bool) -> Self {
        self.share_tunnels = share;
        self
    }

    pub fn consumer(&self) -> Option<&ConsumerToken> {
        self.consumer.as_ref()
    }

    pub fn share_tunnels(&self) -> bool {
        self.share_tunnels
    }

    /// Publish a property value
    pub fn set_property(&self, key: impl Into<String>, value: impl ToString) {
        self.properties.insert(key.into(), value.to_string());
    }

    /// Read a property value
    pub fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).map(|v| v.value().clone())
    }

    /// Read a property and parse it
    pub fn property_as<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.property(key).and_then(|v| v.parse().ok())
    }

    /// Local port published by the most recent jump hop, if any
    pub fn jump_local_port(&self) -> Option<u16> {
        self.property_as(PROP_JUMP_LOCAL_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_properties() {
        let config = HandlerConfig::new(ConsumerToken::new("db"));
        let clone = config.clone();
        clone.set_property(PROP_JUMP_LOCAL_PORT, 40123u16);
        assert_eq!(config.jump_local_port(), Some(40123));
        assert_eq!(config.property("missing"), None);
    }

    #[test]
    fn test_defaults() {
        let config = HandlerConfig::new(ConsumerToken::new("db"));
        assert!(config.share_tunnels());
        assert_eq!(config.consumer().map(|c| c.as_str()), Some("db"));

        let anon = HandlerConfig::anonymous().with_share_tunnels(false);
        assert!(anon.consumer().is_none());
        assert!(!anon.share_tunnels());
    }
}
