//! russh-backed transport

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::Disconnect;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hs_core::config::TransportSettings;
use hs_core::traits::{FileSink, FileSource, Transport};
use hs_core::{
    HandlerConfig, HostAuth, HostDestination, IdentityChain, PortForwardSpec, TransportError,
    LOCAL_HOST,
};

use crate::client::ClientHandler;
use crate::{forward, transfer};

fn ssh(e: russh::Error) -> TransportError {
    TransportError::Ssh(e.to_string())
}

#[derive(Default)]
struct Connection {
    handle: Option<Arc<Handle<ClientHandler>>>,
    /// Listener tasks, keyed by forward identity
    forwards: HashMap<PortForwardSpec, JoinHandle<()>>,
}

/// One SSH connection
pub struct RusshTransport {
    settings: Arc<TransportSettings>,
    identity: Arc<IdentityChain>,
    conn: Mutex<Connection>,
    /// Host key fingerprint seen during the last handshake
    server_id: StdMutex<Option<String>>,
}

impl RusshTransport {
    pub fn new(settings: Arc<TransportSettings>, identity: Arc<IdentityChain>) -> Self {
        Self {
            settings,
            identity,
            conn: Mutex::new(Connection::default()),
            server_id: StdMutex::new(None),
        }
    }

    fn ssh_config(&self) -> Config {
        let non_zero = |d: std::time::Duration| (!d.is_zero()).then_some(d);
        Config {
            client_id: russh::SshId::Standard(crate::client_id()),
            inactivity_timeout: non_zero(self.settings.inactivity_timeout),
            keepalive_interval: non_zero(self.settings.keepalive_interval),
            ..Default::default()
        }
    }

    async fn handle(&self) -> Result<Arc<Handle<ClientHandler>>, TransportError> {
        self.conn
            .lock()
            .await
            .handle
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    async fn dial(
        &self,
        destination: &HostDestination,
    ) -> Result<Handle<ClientHandler>, TransportError> {
        let address = destination.address();
        let (handler, report) = ClientHandler::new(
            address.clone(),
            self.settings
                .host_key(destination.hostname(), destination.port())
                .map(str::to_string),
            self.settings.strict_host_keys,
        );

        tracing::debug!("Connecting to {}", destination);
        let connected = tokio::time::timeout(
            self.settings.connect_timeout,
            client::connect(Arc::new(self.ssh_config()), address.as_str(), handler),
        )
        .await
        .map_err(|_| {
            TransportError::ConnectionRefused(format!("{} timed out", destination))
        })?;

        let report = report
            .lock()
            .map(|r| (r.fingerprint.clone(), r.rejected))
            .unwrap_or((None, false));
        if let Ok(mut id) = self.server_id.lock() {
            *id = report.0.as_ref().map(|fp| format!("SHA256:{}", fp));
        }

        connected.map_err(|e| {
            if report.1 {
                TransportError::HostKeyRejected(destination.to_string())
            } else {
                TransportError::ConnectionRefused(format!("{}: {}", destination, e))
            }
        })
    }

    async fn authenticate(
        &self,
        handle: &mut Handle<ClientHandler>,
        destination: &HostDestination,
    ) -> Result<(), TransportError> {
        let user = destination.username();
        let authenticated = match destination.auth() {
            HostAuth::Password { password } => {
                tracing::debug!("Authenticating as '{}' with password", user);
                handle
                    .authenticate_password(user, password)
                    .await
                    .map_err(ssh)?
            }
            HostAuth::KeyFile { path, passphrase } => {
                tracing::debug!("Authenticating as '{}' with {}", user, path.display());
                try_key(handle, user, path, passphrase.as_deref()).await?
            }
            HostAuth::Agent => {
                let source = self
                    .identity
                    .source()
                    .await
                    .map_err(|e| TransportError::AuthenticationFailed(e.to_string()))?;
                let mut accepted = false;
                for identity in source.identities().await? {
                    tracing::debug!(
                        "Authenticating as '{}' with {} from {}",
                        user,
                        identity.path.display(),
                        source.name()
                    );
                    match try_key(handle, user, &identity.path, identity.passphrase.as_deref())
                        .await
                    {
                        Ok(true) => {
                            accepted = true;
                            break;
                        }
                        Ok(false) => {}
                        Err(e) => tracing::debug!("Skipping {}: {}", identity.path.display(), e),
                    }
                }
                accepted
            }
        };

        if authenticated {
            Ok(())
        } else {
            Err(TransportError::AuthenticationFailed(destination.to_string()))
        }
    }
}

async fn try_key(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    path: &Path,
    passphrase: Option<&str>,
) -> Result<bool, TransportError> {
    let key = russh_keys::load_secret_key(path, passphrase).map_err(|e| {
        TransportError::AuthenticationFailed(format!("cannot load {}: {}", path.display(), e))
    })?;
    handle
        .authenticate_publickey(user, Arc::new(key))
        .await
        .map_err(ssh)
}

#[async_trait]
impl Transport for RusshTransport {
    async fn connect(
        &self,
        monitor: &CancellationToken,
        destination: &HostDestination,
        _config: &HandlerConfig,
    ) -> Result<(), TransportError> {
        let login = async {
            let mut handle = self.dial(destination).await?;
            self.authenticate(&mut handle, destination).await?;
            Ok::<_, TransportError>(handle)
        };
        let handle = tokio::select! {
            res = login => res?,
            _ = monitor.cancelled() => return Err(TransportError::Cancelled),
        };

        let mut conn = self.conn.lock().await;
        conn.handle = Some(Arc::new(handle));
        tracing::info!("SSH session established with {}", destination);
        Ok(())
    }

    async fn connect_via(
        &self,
        monitor: &CancellationToken,
        host: &HostDestination,
        _config: &HandlerConfig,
    ) -> Result<(), TransportError> {
        let handle = self.handle().await?;
        let probe = handle.channel_open_direct_tcpip(
            host.hostname(),
            u32::from(host.port()),
            LOCAL_HOST,
            0,
        );
        let channel = tokio::select! {
            res = probe => res.map_err(|e| {
                TransportError::Forward(format!("{} is unreachable from this hop: {}", host, e))
            })?,
            _ = monitor.cancelled() => return Err(TransportError::Cancelled),
        };
        let _ = channel.close().await;
        tracing::debug!("{} is reachable through this hop", host);
        Ok(())
    }

    async fn disconnect(
        &self,
        _monitor: &CancellationToken,
        _config: &HandlerConfig,
    ) -> Result<(), TransportError> {
        let mut conn = self.conn.lock().await;
        for (spec, task) in conn.forwards.drain() {
            tracing::debug!("Closing forward {}", spec);
            task.abort();
        }
        let Some(handle) = conn.handle.take() else {
            return Ok(());
        };
        drop(conn);

        handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
            .map_err(ssh)
    }

    async fn setup_port_forward(
        &self,
        spec: &PortForwardSpec,
    ) -> Result<PortForwardSpec, TransportError> {
        let mut conn = self.conn.lock().await;
        let handle = conn
            .handle
            .clone()
            .ok_or(TransportError::NotConnected)?;
        if conn.forwards.contains_key(spec) {
            return Err(TransportError::Forward(format!("{} already installed", spec)));
        }

        let (resolved, task) = forward::spawn_forward(spec, handle).await?;
        conn.forwards.insert(resolved.clone(), task);
        Ok(resolved)
    }

    async fn remove_port_forward(&self, spec: &PortForwardSpec) -> Result<(), TransportError> {
        let mut conn = self.conn.lock().await;
        match conn.forwards.remove(spec) {
            Some(task) => {
                task.abort();
                tracing::info!("Forward closed: {}", spec);
                Ok(())
            }
            None => Err(TransportError::Forward(format!("{} is not installed", spec))),
        }
    }

    async fn get_file(
        &self,
        src: &str,
        dst: FileSink<'_>,
        monitor: &CancellationToken,
    ) -> Result<u64, TransportError> {
        let handle = self.handle().await?;
        transfer::download(&handle, src, dst, monitor).await
    }

    async fn put_file(
        &self,
        src: FileSource<'_>,
        dst: &str,
        monitor: &CancellationToken,
    ) -> Result<u64, TransportError> {
        let handle = self.handle().await?;
        transfer::upload(&handle, src, dst, monitor).await
    }

    fn client_version(&self) -> String {
        crate::client_id()
    }

    fn server_version(&self) -> String {
        self.server_id
            .lock()
            .ok()
            .and_then(|id| id.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn transport() -> RusshTransport {
        RusshTransport::new(
            Arc::new(TransportSettings::default()),
            Arc::new(IdentityChain::empty()),
        )
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let transport = transport();
        let monitor = CancellationToken::new();
        let spec = PortForwardSpec::new(LOCAL_HOST, 0, "db.internal", 5432);

        assert!(matches!(
            transport.setup_port_forward(&spec).await,
            Err(TransportError::NotConnected)
        ));
        let mut sink: Vec<u8> = Vec::new();
        assert!(matches!(
            transport.get_file("/etc/motd", &mut sink, &monitor).await,
            Err(TransportError::NotConnected)
        ));
        let host = HostDestination::new("app", 22, "svc", HostAuth::Agent);
        assert!(matches!(
            transport
                .connect_via(&monitor, &host, &HandlerConfig::anonymous())
                .await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let transport = transport();
        transport
            .disconnect(&CancellationToken::new(), &HandlerConfig::anonymous())
            .await
            .unwrap();
        assert_eq!(transport.server_version(), "unknown");
        assert!(transport.client_version().starts_with("SSH-2.0-hopshare_"));
    }

    #[tokio::test]
    async fn test_remove_unknown_forward() {
        let spec = PortForwardSpec::new(LOCAL_HOST, 0, "db.internal", 5432);
        assert!(matches!(
            transport().remove_port_forward(&spec).await,
            Err(TransportError::Forward(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut settings = TransportSettings::default();
        settings.connect_timeout = Duration::from_secs(5);
        let transport = RusshTransport::new(Arc::new(settings), Arc::new(IdentityChain::empty()));
        let dest = HostDestination::new("127.0.0.1", port, "svc", HostAuth::Agent);

        let err = transport
            .connect(&CancellationToken::new(), &dest, &HandlerConfig::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));
    }

    #[tokio::test]
    async fn test_connect_cancelled() {
        // Accepts TCP but never sends an SSH banner
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let dest = HostDestination::new("127.0.0.1", port, "svc", HostAuth::Agent);

        let monitor = CancellationToken::new();
        let trigger = monitor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = transport()
            .connect(&monitor, &dest, &HandlerConfig::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }
}
