//! Opening and releasing a profile's hop chain

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use hs_core::config::{self, HopshareConfig, Profile};
use hs_core::{HandlerConfig, PortForwardSpec};
use hs_russh::{default_identity_chain, RusshTransportFactory};
use hs_session::{Session, SessionChain, SessionRegistry};

/// Load the configuration file, defaulting to the per-user location
pub fn load_profiles(config_path: Option<&PathBuf>) -> Result<(PathBuf, HopshareConfig)> {
    let path = config_path
        .cloned()
        .unwrap_or_else(config::default_config_path);
    let loaded = config::load_config(&path)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;
    Ok((path, loaded))
}

/// Registry backed by russh transports and the default identity chain
pub fn build_registry(config: &HopshareConfig) -> SessionRegistry {
    let identity = Arc::new(default_identity_chain());
    let factory = RusshTransportFactory::new(config.transport.clone(), Arc::clone(&identity));
    SessionRegistry::with_identity(Arc::new(factory), config.registry.clone(), identity)
}

/// A profile's hops, connected for the profile's consumer
pub struct Chain {
    inner: SessionChain,
}

impl Chain {
    /// Connect every hop in order. With `with_forward` the profile's forward
    /// is requested on the final hop.
    pub async fn open(
        registry: &SessionRegistry,
        monitor: &CancellationToken,
        name: &str,
        profile: &Profile,
        with_forward: bool,
    ) -> Result<Self> {
        let destinations = profile.destinations()?;
        let handler = profile.handler_config(name);
        let forward = if with_forward {
            profile.forward_spec()
        } else {
            None
        };

        debug!("Opening '{}' over {} hop(s)", name, destinations.len());
        let inner = SessionChain::open(registry, monitor, &handler, &destinations, forward)
            .await?;
        Ok(Self { inner })
    }

    pub fn handler(&self) -> &HandlerConfig {
        self.inner.config()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The resolved forward on the final hop, if one was requested
    pub async fn forward(&self) -> Option<PortForwardSpec> {
        self.inner.forward().await
    }

    /// A session whose generic operations address the final hop
    pub async fn final_hop(&mut self, monitor: &CancellationToken) -> Result<Arc<dyn Session>> {
        Ok(self.inner.endpoint(monitor).await?)
    }

    /// Release every acquisition the chain holds
    pub async fn release(self, monitor: &CancellationToken) -> Result<()> {
        self.inner
            .release(monitor)
            .await
            .context("Failed to release sessions")
    }
}
