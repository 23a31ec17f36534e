//! russh client handler with host key pinning

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;
use std::sync::{Arc, Mutex};

/// What the handler learned about the server during the handshake
#[derive(Debug, Default)]
pub(crate) struct HostKeyReport {
    /// Fingerprint of the key the server presented
    pub fingerprint: Option<String>,
    /// Set when the key was refused
    pub rejected: bool,
}

pub(crate) struct ClientHandler {
    /// `host:port`, for diagnostics
    address: String,
    /// Pinned fingerprint for this host, if any
    expected_host_key: Option<String>,
    /// Refuse hosts without a pin
    strict: bool,
    report: Arc<Mutex<HostKeyReport>>,
}

impl ClientHandler {
    pub(crate) fn new(
        address: String,
        expected_host_key: Option<String>,
        strict: bool,
    ) -> (Self, Arc<Mutex<HostKeyReport>>) {
        let report = Arc::new(Mutex::new(HostKeyReport::default()));
        let handler = Self {
            address,
            expected_host_key,
            strict,
            report: Arc::clone(&report),
        };
        (handler, report)
    }

    fn accepts(&self, fingerprint: &str) -> bool {
        match &self.expected_host_key {
            Some(expected) => expected.trim_start_matches("SHA256:") == fingerprint,
            None => !self.strict,
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key for {}: SHA256:{}", self.address, fingerprint);

        let accepted = self.accepts(&fingerprint);
        if !accepted {
            match &self.expected_host_key {
                Some(expected) => tracing::warn!(
                    "Host key for {} differs from pinned: expected {}, got SHA256:{}",
                    self.address,
                    expected,
                    fingerprint
                ),
                None => tracing::warn!(
                    "No pinned host key for {} and strict host key checking is on",
                    self.address
                ),
            }
        }

        if let Ok(mut report) = self.report.lock() {
            report.fingerprint = Some(fingerprint);
            report.rejected = !accepted;
        }
        Ok(accepted)
    }
}
