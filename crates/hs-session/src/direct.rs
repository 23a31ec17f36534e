//! Direct session: one acquisition of a shared session plus its forward

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hs_core::traits::{FileSink, FileSource, Transport};
use hs_core::{ConsumerToken, HandlerConfig, HostDestination, PortForwardSpec, SessionError};

use crate::session::Session;
use crate::shareable::ShareableSession;
use crate::wrapper::WrapperSession;

#[derive(Debug)]
struct DirectState {
    /// Requested spec until connected, resolved spec afterwards
    port_forward: Option<PortForwardSpec>,
    forward_active: bool,
    /// Whether this acquisition holds a usage on the shared session
    connected: bool,
}

/// Binds one optional port forward to one connect/disconnect pair
pub struct DirectSession {
    wrapper: WrapperSession,
    /// Bounds the teardown when a failed forward rolls the connect back
    rollback_timeout: Duration,
    state: Mutex<DirectState>,
}

impl DirectSession {
    pub fn new(
        wrapper: WrapperSession,
        port_forward: Option<PortForwardSpec>,
        rollback_timeout: Duration,
    ) -> Self {
        Self {
            wrapper,
            rollback_timeout,
            state: Mutex::new(DirectState {
                port_forward,
                forward_active: false,
                connected: false,
            }),
        }
    }

    /// Forward bound to this acquisition, resolved once connected
    pub async fn port_forward(&self) -> Option<PortForwardSpec> {
        self.state.lock().await.port_forward.clone()
    }

    /// The shared session behind this acquisition
    pub async fn shareable(&self) -> Arc<ShareableSession> {
        self.wrapper.inner().await
    }
}

#[async_trait]
impl Session for DirectSession {
    fn destination(&self) -> &HostDestination {
        self.wrapper.destination()
    }

    async fn connect(
        &self,
        monitor: &CancellationToken,
        destination: &HostDestination,
        config: &HandlerConfig,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if state.connected {
            return Ok(());
        }
        self.wrapper.connect(monitor, destination, config).await?;

        let requested = match &state.port_forward {
            Some(spec) if !state.forward_active => spec.clone(),
            _ => {
                state.connected = true;
                return Ok(());
            }
        };

        match self.wrapper.setup_port_forward(&requested).await {
            Ok(resolved) => {
                debug!("Forward {} bound for {}", resolved, destination);
                state.port_forward = Some(resolved);
                state.forward_active = true;
                state.connected = true;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self
                    .wrapper
                    .disconnect(monitor, config, self.rollback_timeout)
                    .await
                {
                    warn!("Rollback after failed forward {}: {}", requested, rollback);
                }
                Err(e)
            }
        }
    }

    async fn disconnect(
        &self,
        monitor: &CancellationToken,
        config: &HandlerConfig,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(SessionError::NotAcquired {
                consumer: config
                    .consumer()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "anonymous".to_string()),
                destination: self.destination().to_string(),
            });
        }
        state.connected = false;

        let active = match &state.port_forward {
            Some(spec) if state.forward_active => Some(spec.clone()),
            _ => None,
        };
        let forward_result = match active {
            Some(spec) => {
                state.forward_active = false;
                self.wrapper.remove_port_forward(&spec).await
            }
            None => Ok(()),
        };

        let session_result = self.wrapper.disconnect(monitor, config, timeout).await;

        match (forward_result, session_result) {
            (Err(e), Err(other)) => {
                warn!("Disconnect after failed forward removal: {}", other);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn setup_port_forward(
        &self,
        spec: &PortForwardSpec,
    ) -> Result<PortForwardSpec, SessionError> {
        self.wrapper.setup_port_forward(spec).await
    }

    async fn remove_port_forward(&self, spec: &PortForwardSpec) -> Result<(), SessionError> {
        self.wrapper.remove_port_forward(spec).await
    }

    async fn get_file(
        &self,
        src: &str,
        dst: FileSink<'_>,
        monitor: &CancellationToken,
    ) -> Result<u64, SessionError> {
        self.wrapper.get_file(src, dst, monitor).await
    }

    async fn put_file(
        &self,
        src: FileSource<'_>,
        dst: &str,
        monitor: &CancellationToken,
    ) -> Result<u64, SessionError> {
        self.wrapper.put_file(src, dst, monitor).await
    }

    async fn client_version(&self) -> String {
        self.wrapper.client_version().await
    }

    async fn server_version(&self) -> String {
        self.wrapper.server_version().await
    }

    async fn dependent_consumers(&self) -> Vec<ConsumerToken> {
        self.wrapper.dependent_consumers().await
    }

    async fn transport(&self) -> Arc<dyn Transport> {
        self.wrapper.transport().await
    }
}
