//! Identity source traits

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::TransportError;

/// One private key usable for public key authentication
#[derive(Clone)]
pub struct Identity {
    /// Path of the private key file
    pub path: PathBuf,
    /// Passphrase, if the key is encrypted
    pub passphrase: Option<String>,
    /// Free-form description (key comment or provider name)
    pub comment: Option<String>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("path", &self.path)
            .field("encrypted", &self.passphrase.is_some())
            .field("comment", &self.comment)
            .finish()
    }
}

/// A usable source of identities
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Name for diagnostics
    fn name(&self) -> &str;

    /// Identities to try, in order
    async fn identities(&self) -> Result<Vec<Identity>, TransportError>;
}

/// One link of the identity fallback chain
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Name for diagnostics
    fn name(&self) -> &str;

    /// Try to open the source; fails when this provider is unavailable
    async fn open(&self) -> Result<Arc<dyn IdentitySource>, TransportError>;
}
