//! Multi-hop chains of jump sessions
//!
//! The first hop is a direct session. Each later hop is a jump whose origin
//! reaches the previous hop: the first jump rides the first hop's transport,
//! and every jump after that rides a relay session dialed through the
//! previous tunnel with the previous hop's own credentials. Every hop is
//! therefore authenticated on its own transport.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hs_core::{HandlerConfig, HostDestination, PortForwardSpec, SessionError};

use crate::direct::DirectSession;
use crate::jump::JumpSession;
use crate::registry::SessionRegistry;
use crate::session::Session;

fn hop_error(destination: &HostDestination, source: SessionError) -> SessionError {
    SessionError::Hop {
        destination: destination.to_display_string(),
        source: Box::new(source),
    }
}

/// Release `jumps` last to first. Each jump releases its own origin.
async fn unwind(
    jumps: Vec<Arc<JumpSession>>,
    monitor: &CancellationToken,
    config: &HandlerConfig,
    timeout: Duration,
    errors: &mut Vec<SessionError>,
) {
    for jump in jumps.into_iter().rev() {
        if let Err(e) = jump.disconnect(monitor, config, timeout).await {
            errors.push(e);
        }
    }
}

fn first_error(context: &str, errors: Vec<SessionError>) -> Result<(), SessionError> {
    let mut errors = errors.into_iter();
    match errors.next() {
        Some(first) => {
            for other in errors {
                warn!("{}: {}", context, other);
            }
            Err(first)
        }
        None => Ok(()),
    }
}

enum Tail {
    Direct(Arc<DirectSession>),
    Jumps(Vec<Arc<JumpSession>>),
}

/// Connected hops for one consumer
pub struct SessionChain {
    registry: SessionRegistry,
    config: HandlerConfig,
    destinations: Vec<HostDestination>,
    tail: Tail,
    /// Session to the final hop through the last tunnel
    endpoint: Option<Arc<DirectSession>>,
}

impl SessionChain {
    /// Connect every hop in order, requesting `forward` on the final one.
    ///
    /// On failure every acquisition made so far is released and the error
    /// names the hop that could not be reached.
    pub async fn open(
        registry: &SessionRegistry,
        monitor: &CancellationToken,
        config: &HandlerConfig,
        destinations: &[HostDestination],
        forward: Option<PortForwardSpec>,
    ) -> Result<Self, SessionError> {
        let (first, rest) = destinations.split_first().ok_or(SessionError::EmptyChain)?;
        let timeout = registry.settings().disconnect_timeout;
        let total = destinations.len();

        let requested = if rest.is_empty() { forward.clone() } else { None };
        let direct = registry.acquire_direct(config, first, requested);
        debug!("Connecting hop 1/{}: {}", total, first);
        direct
            .connect(monitor, first, config)
            .await
            .map_err(|e| hop_error(first, e))?;

        if rest.is_empty() {
            return Ok(Self {
                registry: registry.clone(),
                config: config.clone(),
                destinations: destinations.to_vec(),
                tail: Tail::Direct(direct),
                endpoint: None,
            });
        }

        let mut jumps: Vec<Arc<JumpSession>> = Vec::with_capacity(rest.len());
        let mut origin: Arc<dyn Session> = direct;
        for (i, destination) in rest.iter().enumerate() {
            if let Some(previous) = jumps.last().cloned() {
                match Self::relay(registry, monitor, config, &previous).await {
                    Ok(relay) => origin = relay as Arc<dyn Session>,
                    Err(e) => {
                        let mut errors = Vec::new();
                        unwind(jumps, monitor, config, timeout, &mut errors).await;
                        if let Err(cleanup) = first_error("Chain rollback", errors) {
                            warn!("Failed to release hops before {}: {}", destination, cleanup);
                        }
                        return Err(e);
                    }
                }
            }

            let requested = if i + 1 == rest.len() {
                forward.clone()
            } else {
                None
            };
            let jump = registry.acquire_jump(Arc::clone(&origin), destination, requested);
            debug!("Connecting hop {}/{}: {}", i + 2, total, destination);
            if let Err(e) = jump.connect(monitor, destination, config).await {
                // A failed jump still holds its origin
                let mut errors = Vec::new();
                if let Err(cleanup) = jump.disconnect(monitor, config, timeout).await {
                    errors.push(cleanup);
                }
                unwind(jumps, monitor, config, timeout, &mut errors).await;
                if let Err(cleanup) = first_error("Chain rollback", errors) {
                    warn!("Failed to release hops before {}: {}", destination, cleanup);
                }
                return Err(hop_error(destination, e));
            }
            jumps.push(jump);
        }

        Ok(Self {
            registry: registry.clone(),
            config: config.clone(),
            destinations: destinations.to_vec(),
            tail: Tail::Jumps(jumps),
            endpoint: None,
        })
    }

    /// Dial the host behind `previous` through its tunnel
    async fn relay(
        registry: &SessionRegistry,
        monitor: &CancellationToken,
        config: &HandlerConfig,
        previous: &Arc<JumpSession>,
    ) -> Result<Arc<DirectSession>, SessionError> {
        let hop = previous.destination();
        let through = previous.through().await.map_err(|e| hop_error(hop, e))?;
        let relay = registry.acquire_direct(config, &through, None);
        debug!("Relaying through {} to reach {}", through, hop);
        relay
            .connect(monitor, &through, config)
            .await
            .map_err(|e| hop_error(hop, e))?;
        Ok(relay)
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn destinations(&self) -> &[HostDestination] {
        &self.destinations
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// The resolved forward on the final hop, if one was requested
    pub async fn forward(&self) -> Option<PortForwardSpec> {
        match &self.tail {
            Tail::Direct(direct) => direct.port_forward().await,
            Tail::Jumps(jumps) => match jumps.last() {
                Some(jump) => jump.port_forward().await,
                None => None,
            },
        }
    }

    /// A session whose generic operations address the final hop.
    ///
    /// Generic operations on a jump go to its origin, so past the first hop
    /// this dials the final host through the local end of the last tunnel.
    pub async fn endpoint(
        &mut self,
        monitor: &CancellationToken,
    ) -> Result<Arc<dyn Session>, SessionError> {
        let last = match &self.tail {
            Tail::Direct(direct) => return Ok(Arc::clone(direct) as Arc<dyn Session>),
            Tail::Jumps(jumps) => match jumps.last() {
                Some(jump) => Arc::clone(jump),
                None => return Err(SessionError::EmptyChain),
            },
        };
        if let Some(endpoint) = &self.endpoint {
            return Ok(Arc::clone(endpoint) as Arc<dyn Session>);
        }

        let endpoint = Self::relay(&self.registry, monitor, &self.config, &last).await?;
        self.endpoint = Some(Arc::clone(&endpoint));
        Ok(endpoint as Arc<dyn Session>)
    }

    /// Release every acquisition the chain holds, final hop first
    pub async fn release(self, monitor: &CancellationToken) -> Result<(), SessionError> {
        let timeout = self.registry.settings().disconnect_timeout;
        let mut errors = Vec::new();

        if let Some(endpoint) = &self.endpoint {
            if let Err(e) = endpoint.disconnect(monitor, &self.config, timeout).await {
                errors.push(e);
            }
        }
        match self.tail {
            Tail::Direct(direct) => {
                if let Err(e) = direct.disconnect(monitor, &self.config, timeout).await {
                    errors.push(e);
                }
            }
            Tail::Jumps(jumps) => {
                unwind(jumps, monitor, &self.config, timeout, &mut errors).await;
            }
        }

        first_error("Chain release", errors)
    }
}
