//! Local port forwarding
//!
//! A forward is a `TcpListener` on the local side and an accept loop that
//! opens one `direct-tcpip` channel per inbound connection and pipes the two
//! together until either side closes.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hs_core::{PortForwardSpec, TransportError};

use crate::client::ClientHandler;

/// A bidirectional byte stream to the remote end of a tunnel
pub trait TunnelIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> TunnelIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type TunnelStream = Box<dyn TunnelIo>;

/// Something that can open `direct-tcpip` tunnels
#[async_trait]
pub trait TunnelOpener: Send + Sync + 'static {
    async fn open_direct_tcpip(
        &self,
        target_host: &str,
        target_port: u16,
        origin: SocketAddr,
    ) -> Result<TunnelStream, TransportError>;
}

#[async_trait]
impl TunnelOpener for russh::client::Handle<ClientHandler> {
    async fn open_direct_tcpip(
        &self,
        target_host: &str,
        target_port: u16,
        origin: SocketAddr,
    ) -> Result<TunnelStream, TransportError> {
        let channel = self
            .channel_open_direct_tcpip(
                target_host,
                u32::from(target_port),
                origin.ip().to_string(),
                u32::from(origin.port()),
            )
            .await
            .map_err(|e| {
                TransportError::Forward(format!(
                    "direct-tcpip to {}:{} refused: {}",
                    hs_core::mask(target_host),
                    target_port,
                    e
                ))
            })?;
        Ok(Box::new(channel.into_stream()))
    }
}

/// Bind the local side of `spec` and start serving it.
///
/// Returns the spec with the port actually bound and the accept loop task.
/// Aborting the task closes the listener.
pub async fn spawn_forward<O>(
    spec: &PortForwardSpec,
    opener: Arc<O>,
) -> Result<(PortForwardSpec, JoinHandle<()>), TransportError>
where
    O: TunnelOpener + ?Sized,
{
    let listener = TcpListener::bind((spec.local_host.as_str(), spec.local_port))
        .await
        .map_err(|e| {
            TransportError::Forward(format!("cannot bind {}: {}", spec.local_endpoint(), e))
        })?;
    let port = listener.local_addr()?.port();
    let resolved = spec.with_local_port(port);
    info!("Forward listening: {}", resolved);

    let task = tokio::spawn(serve(
        listener,
        opener,
        resolved.remote_host.clone(),
        resolved.remote_port,
    ));
    Ok((resolved, task))
}

async fn serve<O>(listener: TcpListener, opener: Arc<O>, remote_host: String, remote_port: u16)
where
    O: TunnelOpener + ?Sized,
{
    loop {
        match listener.accept().await {
            Ok((stream, origin)) => {
                let opener = Arc::clone(&opener);
                let remote_host = remote_host.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        relay(stream, origin, opener.as_ref(), &remote_host, remote_port).await
                    {
                        warn!("Forwarded connection from {} failed: {}", origin, e);
                    }
                });
            }
            Err(e) => {
                warn!("Forward listener accept error: {}", e);
                break;
            }
        }
    }
}

async fn relay<O>(
    mut stream: TcpStream,
    origin: SocketAddr,
    opener: &O,
    remote_host: &str,
    remote_port: u16,
) -> Result<(), TransportError>
where
    O: TunnelOpener + ?Sized,
{
    stream.set_nodelay(true).ok();
    let mut remote = opener
        .open_direct_tcpip(remote_host, remote_port, origin)
        .await?;
    debug!("Tunnel opened for {}", origin);

    let copied = copy_bidirectional(&mut stream, &mut remote).await;
    let _ = remote.shutdown().await;
    let (up, down) = copied?;
    debug!("Tunnel for {} closed ({} bytes up, {} down)", origin, up, down);
    Ok(())
}
