//! Core trait definitions

mod identity;
mod transport;

pub use identity::{Identity, IdentityProvider, IdentitySource};
pub use transport::{FileSink, FileSource, Transport, TransportFactory};
