//! Lazily initialized identity source with an ordered provider chain
//!
//! Key-based authentication needs a usable identity source. Providers are
//! tried in order the first time a source is requested; the first one that
//! opens wins and is cached for the lifetime of the chain. When every
//! provider fails the request fails with
//! [`SessionError::IdentitySourceUnavailable`], which only matters to flows
//! that actually need identities. Failures are not cached, so a provider that
//! becomes available later (an agent started after us) is picked up.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::SessionError;
use crate::traits::{IdentityProvider, IdentitySource};

/// Ordered fallback chain of identity providers
pub struct IdentityChain {
    providers: Vec<Arc<dyn IdentityProvider>>,
    source: OnceCell<Arc<dyn IdentitySource>>,
}

impl IdentityChain {
    /// Create a chain trying `providers` in order
    pub fn new(providers: Vec<Arc<dyn IdentityProvider>>) -> Self {
        Self {
            providers,
            source: OnceCell::new(),
        }
    }

    /// A chain with no providers; every request fails
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Names of the configured providers, in order
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Whether a source has been opened already
    pub fn is_initialized(&self) -> bool {
        self.source.initialized()
    }

    /// Get the identity source, opening it on first use
    pub async fn source(&self) -> Result<Arc<dyn IdentitySource>, SessionError> {
        self.source
            .get_or_try_init(|| self.open_first())
            .await
            .map(Arc::clone)
    }

    async fn open_first(&self) -> Result<Arc<dyn IdentitySource>, SessionError> {
        let mut failures = Vec::new();

        for provider in &self.providers {
            match provider.open().await {
                Ok(source) => {
                    tracing::debug!("Identity source opened with {}", provider.name());
                    return Ok(source);
                }
                Err(e) => {
                    tracing::debug!("Identity provider {} unavailable: {}", provider.name(), e);
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }

        if failures.is_empty() {
            return Err(SessionError::IdentitySourceUnavailable(
                "no identity providers configured".to_string(),
            ));
        }
        Err(SessionError::IdentitySourceUnavailable(failures.join("; ")))
    }
}

impl Default for IdentityChain {
    fn default() -> Self {
        Self::empty()
    }
}
