//! Reference-counted session shared by every consumer of one destination

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hs_core::traits::{FileSink, FileSource, Transport};
use hs_core::{
    ConsumerToken, HandlerConfig, HostDestination, PortForwardSpec, SessionError, TransportError,
};

use crate::registry::{Claim, SessionTable};

/// A forward installed on the transport, with the number of acquisitions using it
#[derive(Debug, Clone)]
struct ForwardEntry {
    resolved: PortForwardSpec,
    usages: usize,
}

/// Consumer and forward tables. Guarded together by one lock because
/// "transport connected iff consumers non-empty" spans both.
#[derive(Debug, Default)]
struct SharedState {
    consumers: HashMap<ConsumerToken, usize>,
    forwards: HashMap<PortForwardSpec, ForwardEntry>,
}

/// Outcome of an attach attempt
pub(crate) enum Attach {
    /// The consumer now holds a usage on this instance
    Attached,
    /// Another instance owns the destination; attach there instead
    Superseded(Arc<ShareableSession>),
}

/// Releases a registry claim unless disarmed, so a cancelled or failed first
/// connect never leaves the destination claimed.
struct ClaimGuard<'a> {
    table: Option<Arc<SessionTable>>,
    session: &'a ShareableSession,
}

impl ClaimGuard<'_> {
    fn disarm(mut self) {
        self.table = None;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            table.release(self.session);
        }
    }
}

/// Serializable view of a shared session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub destination: String,
    pub shared: bool,
    pub live: bool,
    pub consumers: BTreeMap<String, usize>,
    pub forwards: BTreeMap<String, usize>,
}

/// The one transport a set of consumers shares for a destination
pub struct ShareableSession {
    destination: HostDestination,
    transport: Arc<dyn Transport>,
    /// `None` for sessions created with sharing disabled
    table: Option<Weak<SessionTable>>,
    /// Stands in for consumers whose config carries no token
    anonymous: ConsumerToken,
    /// Set while connected with at least one consumer. Observers only see
    /// live sessions.
    live: AtomicBool,
    state: Mutex<SharedState>,
}

impl ShareableSession {
    pub(crate) fn new(
        destination: HostDestination,
        transport: Arc<dyn Transport>,
        table: Option<&Arc<SessionTable>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            destination,
            transport,
            table: table.map(Arc::downgrade),
            anonymous: ConsumerToken::random(),
            live: AtomicBool::new(false),
            state: Mutex::new(SharedState::default()),
        })
    }

    pub fn destination(&self) -> &HostDestination {
        &self.destination
    }

    /// The real transport
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Whether this instance takes part in registry sharing
    pub fn is_shared(&self) -> bool {
        self.table.is_some()
    }

    /// Whether the transport is up with at least one consumer attached
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn token(&self, config: &HandlerConfig) -> ConsumerToken {
        config
            .consumer()
            .cloned()
            .unwrap_or_else(|| self.anonymous.clone())
    }

    fn table(&self) -> Option<Arc<SessionTable>> {
        self.table.as_ref().and_then(Weak::upgrade)
    }

    /// Attach `config`'s consumer, connecting the transport if it is the first.
    ///
    /// The first consumer claims the registry slot before dialing. If another
    /// instance already holds the slot the caller is redirected to it.
    pub(crate) async fn connect(
        self: &Arc<Self>,
        monitor: &CancellationToken,
        destination: &HostDestination,
        config: &HandlerConfig,
    ) -> Result<Attach, SessionError> {
        let mut state = self.state.lock().await;
        let token = self.token(config);

        if state.consumers.is_empty() {
            let guard = match self.table() {
                Some(table) => match table.claim(self) {
                    Claim::Owned => ClaimGuard {
                        table: Some(table),
                        session: self.as_ref(),
                    },
                    Claim::Taken(other) => {
                        debug!(
                            "SessionRegistry: {} is owned by another session, redirecting",
                            destination
                        );
                        return Ok(Attach::Superseded(other));
                    }
                },
                None => ClaimGuard {
                    table: None,
                    session: self.as_ref(),
                },
            };

            debug!("SessionRegistry: connecting transport to {}", destination);
            let connected = tokio::select! {
                res = self.transport.connect(monitor, destination, config) => res,
                _ = monitor.cancelled() => Err(TransportError::Cancelled),
            };
            // The guard releases the claim when the connect failed
            connected?;
            guard.disarm();

            self.live.store(true, Ordering::Release);
            info!("Transport connected to {}", destination);
        }

        let usages = state.consumers.entry(token.clone()).or_insert(0);
        *usages += 1;
        debug!(
            "SessionRegistry: {} attached to {} (usage {})",
            token, destination, usages
        );
        Ok(Attach::Attached)
    }

    /// Detach `config`'s consumer; the last one tears the transport down
    /// within `timeout`. Accounting completes even when teardown fails.
    pub async fn disconnect(
        &self,
        monitor: &CancellationToken,
        config: &HandlerConfig,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        let token = self.token(config);

        let remaining = match state.consumers.get_mut(&token) {
            Some(usages) => {
                *usages -= 1;
                *usages
            }
            None => {
                return Err(SessionError::NotAcquired {
                    consumer: token.to_string(),
                    destination: self.destination.to_string(),
                })
            }
        };
        if remaining == 0 {
            state.consumers.remove(&token);
        }
        debug!(
            "SessionRegistry: {} released {} (usage {})",
            token, self.destination, remaining
        );

        if !state.consumers.is_empty() {
            return Ok(());
        }

        self.live.store(false, Ordering::Release);
        let result = self.teardown(&mut state, monitor, config, timeout).await;
        if let Some(table) = self.table() {
            table.release(self);
        }
        result
    }

    /// Remove leftover forwards then disconnect the transport. Caller holds
    /// the state lock.
    async fn teardown(
        &self,
        state: &mut SharedState,
        monitor: &CancellationToken,
        config: &HandlerConfig,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        for (_, entry) in state.forwards.drain() {
            if let Err(e) = self.transport.remove_port_forward(&entry.resolved).await {
                warn!("Failed to remove forward {}: {}", entry.resolved, e);
            }
        }

        info!("Disconnecting transport from {}", self.destination);
        match tokio::time::timeout(timeout, self.transport.disconnect(monitor, config)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Transport teardown for {} failed: {}", self.destination, e);
                Err(e.into())
            }
            Err(_) => {
                warn!(
                    "Transport teardown for {} timed out after {:?}",
                    self.destination, timeout
                );
                Err(SessionError::DisconnectTimeout(timeout))
            }
        }
    }

    /// Force-disconnect every consumer. Used on shutdown.
    pub async fn close(
        &self,
        monitor: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if state.consumers.is_empty() {
            return Ok(());
        }
        state.consumers.clear();
        self.live.store(false, Ordering::Release);

        let result = self
            .teardown(&mut state, monitor, &HandlerConfig::anonymous(), timeout)
            .await;
        if let Some(table) = self.table() {
            table.release(self);
        }
        result
    }

    /// Set up a forward or reuse the equivalent one already installed
    pub async fn setup_port_forward(
        &self,
        spec: &PortForwardSpec,
    ) -> Result<PortForwardSpec, SessionError> {
        let mut state = self.state.lock().await;

        if let Some(entry) = state.forwards.get_mut(spec) {
            entry.usages += 1;
            debug!(
                "SessionRegistry: reusing forward {} (usage {})",
                entry.resolved, entry.usages
            );
            return Ok(entry.resolved.clone());
        }

        let resolved = self.transport.setup_port_forward(spec).await?;
        debug!("SessionRegistry: installed forward {}", resolved);
        state.forwards.insert(
            resolved.clone(),
            ForwardEntry {
                resolved: resolved.clone(),
                usages: 1,
            },
        );
        Ok(resolved)
    }

    /// Release one usage of a forward, removing it at zero
    pub async fn remove_port_forward(&self, spec: &PortForwardSpec) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;

        let entry = state
            .forwards
            .get_mut(spec)
            .ok_or_else(|| SessionError::NotSetUp(spec.to_string()))?;
        entry.usages -= 1;
        if entry.usages > 0 {
            debug!(
                "SessionRegistry: forward {} still used (usage {})",
                entry.resolved, entry.usages
            );
            return Ok(());
        }

        let resolved = entry.resolved.clone();
        state.forwards.remove(spec);
        debug!("SessionRegistry: removing forward {}", resolved);
        self.transport.remove_port_forward(&resolved).await?;
        Ok(())
    }

    pub async fn get_file(
        &self,
        src: &str,
        dst: FileSink<'_>,
        monitor: &CancellationToken,
    ) -> Result<u64, SessionError> {
        Ok(self.transport.get_file(src, dst, monitor).await?)
    }

    pub async fn put_file(
        &self,
        src: FileSource<'_>,
        dst: &str,
        monitor: &CancellationToken,
    ) -> Result<u64, SessionError> {
        Ok(self.transport.put_file(src, dst, monitor).await?)
    }

    pub fn client_version(&self) -> String {
        self.transport.client_version()
    }

    pub fn server_version(&self) -> String {
        self.transport.server_version()
    }

    /// Attached consumers, sorted
    pub async fn consumers(&self) -> Vec<ConsumerToken> {
        let state = self.state.lock().await;
        let mut consumers: Vec<_> = state.consumers.keys().cloned().collect();
        consumers.sort();
        consumers
    }

    /// Usage count of one consumer
    pub async fn usage(&self, token: &ConsumerToken) -> usize {
        let state = self.state.lock().await;
        state.consumers.get(token).copied().unwrap_or(0)
    }

    /// Usage count of the forward equivalent to `spec`
    pub async fn port_forward_usage(&self, spec: &PortForwardSpec) -> usize {
        let state = self.state.lock().await;
        state.forwards.get(spec).map(|e| e.usages).unwrap_or(0)
    }

    pub fn destination_info(&self) -> String {
        self.destination.to_display_string()
    }

    /// `token (count), ...`
    pub async fn consumer_info(&self) -> String {
        let state = self.state.lock().await;
        let mut parts: Vec<_> = state
            .consumers
            .iter()
            .map(|(token, n)| format!("{} ({})", token, n))
            .collect();
        parts.sort();
        parts.join(", ")
    }

    /// `local:port <- remote:port (count), ...`
    pub async fn port_forward_info(&self) -> String {
        let state = self.state.lock().await;
        let mut parts: Vec<_> = state
            .forwards
            .values()
            .map(|e| format!("{} ({})", e.resolved.to_display_string(), e.usages))
            .collect();
        parts.sort();
        parts.join(", ")
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            destination: self.destination_info(),
            shared: self.is_shared(),
            live: self.is_live(),
            consumers: state
                .consumers
                .iter()
                .map(|(token, n)| (token.to_string(), *n))
                .collect(),
            forwards: state
                .forwards
                .values()
                .map(|e| (e.resolved.to_display_string(), e.usages))
                .collect(),
        }
    }
}

impl std::fmt::Debug for ShareableSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareableSession")
            .field("destination", &self.destination)
            .field("shared", &self.is_shared())
            .field("live", &self.is_live())
            .finish()
    }
}
