//! Consumer-visible session capability

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use hs_core::traits::{FileSink, FileSource, Transport};
use hs_core::{ConsumerToken, HandlerConfig, HostDestination, PortForwardSpec, SessionError};

/// A session as seen by a consumer.
///
/// Every decorator in a chain implements this trait and holds exactly one
/// inner session (or shareable session), so a chain is unwound by plain
/// delegation.
#[async_trait]
pub trait Session: Send + Sync {
    /// Destination this session reaches
    fn destination(&self) -> &HostDestination;

    /// Attach `config`'s consumer, connecting the transport if needed
    async fn connect(
        &self,
        monitor: &CancellationToken,
        destination: &HostDestination,
        config: &HandlerConfig,
    ) -> Result<(), SessionError>;

    /// Detach `config`'s consumer; the last one tears the transport down
    async fn disconnect(
        &self,
        monitor: &CancellationToken,
        config: &HandlerConfig,
        timeout: Duration,
    ) -> Result<(), SessionError>;

    /// Set up (or reuse) a forward, returning the resolved spec
    async fn setup_port_forward(
        &self,
        spec: &PortForwardSpec,
    ) -> Result<PortForwardSpec, SessionError>;

    /// Release one usage of a forward
    async fn remove_port_forward(&self, spec: &PortForwardSpec) -> Result<(), SessionError>;

    /// Download `src` into `dst`
    async fn get_file(
        &self,
        src: &str,
        dst: FileSink<'_>,
        monitor: &CancellationToken,
    ) -> Result<u64, SessionError>;

    /// Upload `src` to remote path `dst`
    async fn put_file(
        &self,
        src: FileSource<'_>,
        dst: &str,
        monitor: &CancellationToken,
    ) -> Result<u64, SessionError>;

    /// Client protocol identification string
    async fn client_version(&self) -> String;

    /// Server protocol identification string
    async fn server_version(&self) -> String;

    /// Consumers currently holding the underlying shared session
    async fn dependent_consumers(&self) -> Vec<ConsumerToken>;

    /// The real transport generic operations end up on
    async fn transport(&self) -> Arc<dyn Transport>;
}
