//! Session registry
//!
//! Maps destinations to their shared session and hands out per-acquisition
//! decorators. The registry is an explicit value: clone it to share it, build
//! a fresh one for an isolated set of sessions.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hs_core::config::RegistrySettings;
use hs_core::traits::{IdentitySource, TransportFactory};
use hs_core::{
    ConsumerToken, HandlerConfig, HostDestination, IdentityChain, PortForwardSpec, SessionError,
};

use crate::direct::DirectSession;
use crate::jump::JumpSession;
use crate::session::Session;
use crate::shareable::{SessionSnapshot, ShareableSession};
use crate::wrapper::WrapperSession;

/// Result of claiming a destination slot
pub(crate) enum Claim {
    /// The slot is held by the claiming session
    Owned,
    /// Another session holds the slot
    Taken(Arc<ShareableSession>),
}

/// Destination slots. A slot is claimed by the first consumer's connect and
/// released once the last consumer's teardown finished.
#[derive(Default)]
pub(crate) struct SessionTable {
    slots: DashMap<HostDestination, Arc<ShareableSession>>,
}

impl SessionTable {
    pub(crate) fn claim(&self, session: &Arc<ShareableSession>) -> Claim {
        match self.slots.entry(session.destination().clone()) {
            Entry::Occupied(entry) if Arc::ptr_eq(entry.get(), session) => Claim::Owned,
            Entry::Occupied(entry) => Claim::Taken(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(session));
                Claim::Owned
            }
        }
    }

    pub(crate) fn release(&self, session: &ShareableSession) {
        let removed = self
            .slots
            .remove_if(session.destination(), |_, held| {
                std::ptr::eq(Arc::as_ptr(held), session)
            })
            .is_some();
        if removed {
            debug!("SessionRegistry: unregistered {}", session.destination());
        }
    }

    /// Session holding the slot, live or still connecting
    pub(crate) fn lookup(&self, destination: &HostDestination) -> Option<Arc<ShareableSession>> {
        self.slots.get(destination).map(|s| Arc::clone(s.value()))
    }

    /// Sessions that are connected with at least one consumer
    pub(crate) fn live_sessions(&self) -> Vec<Arc<ShareableSession>> {
        self.slots
            .iter()
            .filter(|s| s.value().is_live())
            .map(|s| Arc::clone(s.value()))
            .collect()
    }
}

/// Phase of a connection invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidatePhase {
    /// Release the consumer's hold on the session
    BeforeInvalidate,
    /// Re-attach the consumer, reconnecting if needed
    Invalidate,
    /// Nothing left to do at the session level
    AfterInvalidate,
}

struct RegistryInner {
    table: Arc<SessionTable>,
    factory: Arc<dyn TransportFactory>,
    settings: RegistrySettings,
    identity: Arc<IdentityChain>,
}

/// Process-level bookkeeping of shared sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create a registry without identity providers
    pub fn new(factory: Arc<dyn TransportFactory>, settings: RegistrySettings) -> Self {
        Self::with_identity(factory, settings, Arc::new(IdentityChain::empty()))
    }

    pub fn with_identity(
        factory: Arc<dyn TransportFactory>,
        settings: RegistrySettings,
        identity: Arc<IdentityChain>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                table: Arc::new(SessionTable::default()),
                factory,
                settings,
                identity,
            }),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.inner.settings
    }

    /// Whether sessions for `config` may be shared with other consumers.
    ///
    /// Configurations without a consumer (connection tests) never share.
    pub fn can_share(&self, config: &HandlerConfig) -> bool {
        !self.inner.settings.disable_sharing
            && config.consumer().is_some()
            && config.share_tunnels()
    }

    /// Get a session for `destination`, chained through `origin` when given.
    ///
    /// Nothing is connected until the returned session's `connect` runs.
    pub fn acquire_session(
        &self,
        config: &HandlerConfig,
        destination: &HostDestination,
        origin: Option<Arc<dyn Session>>,
        port_forward: Option<PortForwardSpec>,
    ) -> Arc<dyn Session> {
        match origin {
            Some(origin) => self.acquire_jump(origin, destination, port_forward),
            None => self.acquire_direct(config, destination, port_forward),
        }
    }

    /// Per-acquisition decorator over the destination's shared session
    pub fn acquire_direct(
        &self,
        config: &HandlerConfig,
        destination: &HostDestination,
        port_forward: Option<PortForwardSpec>,
    ) -> Arc<DirectSession> {
        let shareable = if self.can_share(config) {
            match self.inner.table.lookup(destination) {
                Some(existing) => {
                    debug!("SessionRegistry: reusing session to {}", destination);
                    existing
                }
                // Registered by the first connect
                None => ShareableSession::new(
                    destination.clone(),
                    self.inner.factory.create(),
                    Some(&self.inner.table),
                ),
            }
        } else {
            debug!("SessionRegistry: unshared session to {}", destination);
            ShareableSession::new(destination.clone(), self.inner.factory.create(), None)
        };

        Arc::new(DirectSession::new(
            WrapperSession::new(shareable),
            port_forward,
            self.inner.settings.disconnect_timeout,
        ))
    }

    /// Per-acquisition decorator reaching `destination` through `origin`
    pub fn acquire_jump(
        &self,
        origin: Arc<dyn Session>,
        destination: &HostDestination,
        port_forward: Option<PortForwardSpec>,
    ) -> Arc<JumpSession> {
        Arc::new(JumpSession::new(
            self.clone(),
            origin,
            destination.clone(),
            port_forward,
        ))
    }

    /// Acquire and connect in one step
    pub async fn open_session(
        &self,
        monitor: &CancellationToken,
        config: &HandlerConfig,
        destination: &HostDestination,
        origin: Option<Arc<dyn Session>>,
        port_forward: Option<PortForwardSpec>,
    ) -> Result<Arc<dyn Session>, SessionError> {
        let session = self.acquire_session(config, destination, origin, port_forward);
        session.connect(monitor, destination, config).await?;
        Ok(session)
    }

    /// Detach `config`'s consumer from `session`
    pub async fn release(
        &self,
        monitor: &CancellationToken,
        session: &dyn Session,
        config: &HandlerConfig,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        session.disconnect(monitor, config, timeout).await
    }

    /// Drive one phase of revalidating a broken session
    pub async fn invalidate(
        &self,
        monitor: &CancellationToken,
        session: &dyn Session,
        phase: InvalidatePhase,
        config: &HandlerConfig,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        match phase {
            InvalidatePhase::BeforeInvalidate => {
                self.release(monitor, session, config, timeout).await
            }
            InvalidatePhase::Invalidate => {
                let destination = session.destination().clone();
                session.connect(monitor, &destination, config).await
            }
            InvalidatePhase::AfterInvalidate => Ok(()),
        }
    }

    /// Live shared sessions
    pub fn sessions(&self) -> Vec<Arc<ShareableSession>> {
        self.inner.table.live_sessions()
    }

    /// Snapshots of the live shared sessions, ordered by destination
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots = Vec::new();
        for session in self.sessions() {
            snapshots.push(session.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.destination.cmp(&b.destination));
        snapshots
    }

    /// Consumers holding the shared session behind `session`
    pub async fn dependent_consumers(&self, session: &dyn Session) -> Vec<ConsumerToken> {
        session.dependent_consumers().await
    }

    /// The identity source, opened from the provider chain on first use
    pub async fn identity_source(&self) -> Result<Arc<dyn IdentitySource>, SessionError> {
        self.inner.identity.source().await
    }

    /// Tear down every live shared session regardless of remaining consumers
    pub async fn shutdown(&self, monitor: &CancellationToken, timeout: Duration) {
        for session in self.sessions() {
            if let Err(e) = session.close(monitor, timeout).await {
                warn!("Failed to close session to {}: {}", session.destination(), e);
            }
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("settings", &self.inner.settings)
            .field("sessions", &self.inner.table.slots.len())
            .finish()
    }
}
