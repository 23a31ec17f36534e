//! hs-russh: russh transport for hopshare
//!
//! [`RusshTransport`] implements [`hs_core::traits::Transport`] on top of a
//! russh client connection: password, key file or identity chain login,
//! direct-tcpip probes for jump hops, local port forwards served from a
//! `TcpListener`, and file streaming over `exec` channels.

mod client;
pub mod factory;
pub mod forward;
pub mod identity;
pub mod transfer;
pub mod transport;

pub use factory::RusshTransportFactory;
pub use identity::{default_identity_chain, DefaultKeysProvider, EnvKeyProvider, KeyFileSource};
pub use transport::RusshTransport;

/// Identification string sent to servers
pub fn client_id() -> String {
    format!("SSH-2.0-hopshare_{}", env!("CARGO_PKG_VERSION"))
}
