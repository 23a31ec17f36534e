//! Jump session: a destination reached through a tunnel on an origin session
//!
//! Connecting asks the origin's transport to prepare a channel to the next
//! host, then forwards an ephemeral local port on the origin to that host.
//! The local port is published in the handler config under
//! [`PROP_JUMP_LOCAL_PORT`] for whatever dials the next hop. When the
//! acquisition carries its own forward, an inner direct session is opened
//! through the tunnel and the forward is set up there.
//!
//! Generic operations (file transfer, versions, forwards requested on the
//! jump itself) address the origin. Chains longer than two hops go through
//! [`crate::SessionChain`], which gives each later jump a relay origin
//! dialed through the previous tunnel.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hs_core::handler::PROP_JUMP_LOCAL_PORT;
use hs_core::traits::{FileSink, FileSource, Transport};
use hs_core::{
    ConsumerToken, HandlerConfig, HostDestination, PortForwardSpec, SessionError, LOCAL_HOST,
};

use crate::direct::DirectSession;
use crate::registry::SessionRegistry;
use crate::session::Session;

/// `host`'s account, dialed at the local end of a tunnel
fn tunneled(host: &HostDestination, port: u16) -> HostDestination {
    HostDestination::new(LOCAL_HOST, port, host.username(), host.auth().clone())
}

#[derive(Default)]
struct JumpState {
    /// Whether this acquisition holds a usage on the origin
    origin_attached: bool,
    /// Forward on the origin leading to the destination
    tunnel: Option<PortForwardSpec>,
    /// Session opened through the tunnel for the requested forward
    inner: Option<Arc<DirectSession>>,
}

/// One acquisition of a destination reached through an origin session
pub struct JumpSession {
    registry: SessionRegistry,
    origin: Arc<dyn Session>,
    destination: HostDestination,
    port_forward: Option<PortForwardSpec>,
    state: Mutex<JumpState>,
}

impl JumpSession {
    /// `origin` must already be connected for this acquisition's consumer
    pub fn new(
        registry: SessionRegistry,
        origin: Arc<dyn Session>,
        destination: HostDestination,
        port_forward: Option<PortForwardSpec>,
    ) -> Self {
        Self {
            registry,
            origin,
            destination,
            port_forward,
            state: Mutex::new(JumpState {
                origin_attached: true,
                ..Default::default()
            }),
        }
    }

    pub fn origin(&self) -> &Arc<dyn Session> {
        &self.origin
    }

    /// Forward on the origin leading to the destination, once connected
    pub async fn tunnel(&self) -> Option<PortForwardSpec> {
        self.state.lock().await.tunnel.clone()
    }

    /// Local port the tunnel listens on, once connected
    pub async fn local_port(&self) -> Option<u16> {
        self.tunnel().await.map(|t| t.local_port)
    }

    /// Session opened through the tunnel, if a forward was requested
    pub async fn inner(&self) -> Option<Arc<DirectSession>> {
        self.state.lock().await.inner.clone()
    }

    /// Where the destination is reachable through the tunnel
    pub async fn through(&self) -> Result<HostDestination, SessionError> {
        let tunnel = self.tunnel().await.ok_or(SessionError::NotConnected)?;
        Ok(tunneled(&self.destination, tunnel.local_port))
    }

    /// Forward requested for this acquisition, resolved once connected
    pub async fn port_forward(&self) -> Option<PortForwardSpec> {
        match self.inner().await {
            Some(inner) => inner.port_forward().await,
            None => self.port_forward.clone(),
        }
    }

    async fn open_tunnel(
        &self,
        state: &mut JumpState,
        monitor: &CancellationToken,
        host: &HostDestination,
        config: &HandlerConfig,
    ) -> Result<(), SessionError> {
        self.origin
            .transport()
            .await
            .connect_via(monitor, host, config)
            .await?;

        let tunnel = self
            .origin
            .setup_port_forward(&PortForwardSpec::new(
                LOCAL_HOST,
                0,
                host.hostname(),
                host.port(),
            ))
            .await?;
        config.set_property(PROP_JUMP_LOCAL_PORT, tunnel.local_port);
        debug!("SessionRegistry: tunnel {} leads to {}", tunnel, host);

        if let Some(requested) = &self.port_forward {
            let through = tunneled(host, tunnel.local_port);
            let inner = self
                .registry
                .acquire_direct(config, &through, Some(requested.clone()));
            if let Err(e) = inner.connect(monitor, &through, config).await {
                if let Err(cleanup) = self.origin.remove_port_forward(&tunnel).await {
                    warn!("Failed to remove tunnel {}: {}", tunnel, cleanup);
                }
                return Err(e);
            }
            state.inner = Some(inner);
        }

        state.tunnel = Some(tunnel);
        Ok(())
    }
}

#[async_trait]
impl Session for JumpSession {
    fn destination(&self) -> &HostDestination {
        &self.destination
    }

    async fn connect(
        &self,
        monitor: &CancellationToken,
        host: &HostDestination,
        config: &HandlerConfig,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if state.tunnel.is_some() {
            return Ok(());
        }

        let reattached = !state.origin_attached;
        if reattached {
            let origin_destination = self.origin.destination().clone();
            self.origin
                .connect(monitor, &origin_destination, config)
                .await?;
            state.origin_attached = true;
        }

        let result = self.open_tunnel(&mut state, monitor, host, config).await;
        if result.is_err() && reattached {
            let timeout = self.registry.settings().disconnect_timeout;
            if let Err(e) = self.origin.disconnect(monitor, config, timeout).await {
                warn!("Failed to detach origin {}: {}", self.origin.destination(), e);
            }
            state.origin_attached = false;
        }
        result
    }

    async fn disconnect(
        &self,
        monitor: &CancellationToken,
        config: &HandlerConfig,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if !state.origin_attached {
            return Err(SessionError::NotAcquired {
                consumer: config
                    .consumer()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "anonymous".to_string()),
                destination: self.destination.to_string(),
            });
        }

        let mut errors = Vec::new();
        if let Some(inner) = state.inner.take() {
            if let Err(e) = inner.disconnect(monitor, config, timeout).await {
                errors.push(e);
            }
        }
        if let Some(tunnel) = state.tunnel.take() {
            if let Err(e) = self.origin.remove_port_forward(&tunnel).await {
                errors.push(e);
            }
        }
        if let Err(e) = self.origin.disconnect(monitor, config, timeout).await {
            errors.push(e);
        }
        state.origin_attached = false;

        let mut errors = errors.into_iter();
        match errors.next() {
            Some(first) => {
                for other in errors {
                    warn!("Jump teardown for {}: {}", self.destination, other);
                }
                Err(first)
            }
            None => Ok(()),
        }
    }

    async fn setup_port_forward(
        &self,
        spec: &PortForwardSpec,
    ) -> Result<PortForwardSpec, SessionError> {
        self.origin.setup_port_forward(spec).await
    }

    async fn remove_port_forward(&self, spec: &PortForwardSpec) -> Result<(), SessionError> {
        self.origin.remove_port_forward(spec).await
    }

    async fn get_file(
        &self,
        src: &str,
        dst: FileSink<'_>,
        monitor: &CancellationToken,
    ) -> Result<u64, SessionError> {
        self.origin.get_file(src, dst, monitor).await
    }

    async fn put_file(
        &self,
        src: FileSource<'_>,
        dst: &str,
        monitor: &CancellationToken,
    ) -> Result<u64, SessionError> {
        self.origin.put_file(src, dst, monitor).await
    }

    async fn client_version(&self) -> String {
        self.origin.client_version().await
    }

    async fn server_version(&self) -> String {
        self.origin.server_version().await
    }

    async fn dependent_consumers(&self) -> Vec<ConsumerToken> {
        self.origin.dependent_consumers().await
    }

    async fn transport(&self) -> Arc<dyn Transport> {
        self.origin.transport().await
    }
}
