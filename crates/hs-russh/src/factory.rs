//! Transport factory for the session registry

use std::sync::Arc;

use hs_core::config::TransportSettings;
use hs_core::traits::{Transport, TransportFactory};
use hs_core::IdentityChain;

use crate::transport::RusshTransport;

/// Creates unconnected [`RusshTransport`]s sharing settings and identities
#[derive(Clone)]
pub struct RusshTransportFactory {
    settings: Arc<TransportSettings>,
    identity: Arc<IdentityChain>,
}

impl RusshTransportFactory {
    pub fn new(settings: TransportSettings, identity: Arc<IdentityChain>) -> Self {
        Self {
            settings: Arc::new(settings),
            identity,
        }
    }

    pub fn identity(&self) -> Arc<IdentityChain> {
        Arc::clone(&self.identity)
    }
}

impl TransportFactory for RusshTransportFactory {
    fn create(&self) -> Arc<dyn Transport> {
        Arc::new(RusshTransport::new(
            Arc::clone(&self.settings),
            Arc::clone(&self.identity),
        ))
    }
}
