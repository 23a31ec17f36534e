//! hs-core: Core types, traits and configuration for hopshare
//!
//! This crate provides the value types, error taxonomy, transport traits and
//! configuration structures shared by the session layer, the russh transport
//! and the CLI.

pub mod config;
pub mod error;
pub mod forward;
pub mod handler;
pub mod identity;
pub mod traits;
pub mod types;

pub use error::{HsError, SessionError, TransportError};
pub use forward::PortForwardSpec;
pub use handler::HandlerConfig;
pub use identity::IdentityChain;
pub use types::{mask, ConsumerToken, HostAuth, HostDestination};

/// Loopback address used for locally bound forwards
pub const LOCAL_HOST: &str = "127.0.0.1";
