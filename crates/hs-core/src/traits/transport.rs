//! Transport traits

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::forward::PortForwardSpec;
use crate::handler::HandlerConfig;
use crate::types::HostDestination;

/// Writer a downloaded file is streamed into
pub type FileSink<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Reader an uploaded file is streamed from
pub type FileSource<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// One real connection to a remote host.
///
/// A transport is created unconnected by a [`TransportFactory`] and owned by
/// exactly one shareable session, which serializes connect and disconnect.
/// Every operation may block on network I/O; long operations abort when the
/// `monitor` token is cancelled.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection and authenticate
    async fn connect(
        &self,
        monitor: &CancellationToken,
        destination: &HostDestination,
        config: &HandlerConfig,
    ) -> Result<(), TransportError>;

    /// Prepare a second-hop channel from this (connected) transport to `host`
    async fn connect_via(
        &self,
        monitor: &CancellationToken,
        host: &HostDestination,
        config: &HandlerConfig,
    ) -> Result<(), TransportError>;

    /// Tear the connection down. Callers bound this with their own timeout.
    async fn disconnect(
        &self,
        monitor: &CancellationToken,
        config: &HandlerConfig,
    ) -> Result<(), TransportError>;

    /// Install a forward and return it with the local port actually bound
    async fn setup_port_forward(
        &self,
        spec: &PortForwardSpec,
    ) -> Result<PortForwardSpec, TransportError>;

    /// Remove a previously installed forward
    async fn remove_port_forward(&self, spec: &PortForwardSpec) -> Result<(), TransportError>;

    /// Stream remote file `src` into `dst`, returning the bytes copied
    async fn get_file(
        &self,
        src: &str,
        dst: FileSink<'_>,
        monitor: &CancellationToken,
    ) -> Result<u64, TransportError>;

    /// Stream `src` into remote file `dst`, returning the bytes copied
    async fn put_file(
        &self,
        src: FileSource<'_>,
        dst: &str,
        monitor: &CancellationToken,
    ) -> Result<u64, TransportError>;

    /// Client protocol identification string
    fn client_version(&self) -> String;

    /// Server protocol identification string
    fn server_version(&self) -> String;
}

/// Creates fresh, unconnected transports
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Arc<dyn Transport> + Send + Sync,
{
    fn create(&self) -> Arc<dyn Transport> {
        self()
    }
}
