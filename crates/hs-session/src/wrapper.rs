//! Pass-through session over a shared session

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use hs_core::traits::{FileSink, FileSource, Transport};
use hs_core::{ConsumerToken, HandlerConfig, HostDestination, PortForwardSpec, SessionError};

use crate::session::Session;
use crate::shareable::{Attach, ShareableSession};

/// Forwards every operation to one [`ShareableSession`].
///
/// If the bound instance lost the destination slot to another instance by
/// the time `connect` runs, the wrapper rebinds to the slot owner.
pub struct WrapperSession {
    destination: HostDestination,
    inner: RwLock<Arc<ShareableSession>>,
}

impl WrapperSession {
    pub fn new(inner: Arc<ShareableSession>) -> Self {
        Self {
            destination: inner.destination().clone(),
            inner: RwLock::new(inner),
        }
    }

    /// The shared session currently bound
    pub async fn inner(&self) -> Arc<ShareableSession> {
        Arc::clone(&*self.inner.read().await)
    }
}

#[async_trait]
impl Session for WrapperSession {
    fn destination(&self) -> &HostDestination {
        &self.destination
    }

    async fn connect(
        &self,
        monitor: &CancellationToken,
        destination: &HostDestination,
        config: &HandlerConfig,
    ) -> Result<(), SessionError> {
        let mut bound = self.inner.write().await;
        loop {
            match bound.connect(monitor, destination, config).await? {
                Attach::Attached => return Ok(()),
                Attach::Superseded(owner) => {
                    debug!("SessionRegistry: rebinding to live session for {}", destination);
                    *bound = owner;
                }
            }
        }
    }

    async fn disconnect(
        &self,
        monitor: &CancellationToken,
        config: &HandlerConfig,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        self.inner().await.disconnect(monitor, config, timeout).await
    }

    async fn setup_port_forward(
        &self,
        spec: &PortForwardSpec,
    ) -> Result<PortForwardSpec, SessionError> {
        self.inner().await.setup_port_forward(spec).await
    }

    async fn remove_port_forward(&self, spec: &PortForwardSpec) -> Result<(), SessionError> {
        self.inner().await.remove_port_forward(spec).await
    }

    async fn get_file(
        &self,
        src: &str,
        dst: FileSink<'_>,
        monitor: &CancellationToken,
    ) -> Result<u64, SessionError> {
        self.inner().await.get_file(src, dst, monitor).await
    }

    async fn put_file(
        &self,
        src: FileSource<'_>,
        dst: &str,
        monitor: &CancellationToken,
    ) -> Result<u64, SessionError> {
        self.inner().await.put_file(src, dst, monitor).await
    }

    async fn client_version(&self) -> String {
        self.inner().await.client_version()
    }

    async fn server_version(&self) -> String {
        self.inner().await.server_version()
    }

    async fn dependent_consumers(&self) -> Vec<ConsumerToken> {
        self.inner().await.consumers().await
    }

    async fn transport(&self) -> Arc<dyn Transport> {
        self.inner().await.transport()
    }
}
