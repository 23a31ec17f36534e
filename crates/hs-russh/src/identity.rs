//! Key file identity providers

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hs_core::traits::{Identity, IdentityProvider, IdentitySource};
use hs_core::{IdentityChain, TransportError};

/// Environment variable holding a path list of private keys
pub const IDENTITY_ENV: &str = "HOPSHARE_IDENTITY";

/// Default key file names, in preference order
pub const DEFAULT_KEY_FILES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// A fixed list of key files
#[derive(Debug, Clone)]
pub struct KeyFileSource {
    name: String,
    identities: Vec<Identity>,
}

impl KeyFileSource {
    pub fn new(name: impl Into<String>, identities: Vec<Identity>) -> Self {
        Self {
            name: name.into(),
            identities,
        }
    }

    /// Source listing the files among `paths` that exist
    fn from_existing(name: &str, paths: impl IntoIterator<Item = PathBuf>) -> Option<Self> {
        let identities: Vec<_> = paths
            .into_iter()
            .filter(|p| p.is_file())
            .map(|path| Identity {
                comment: Some(format!("{} ({})", name, path.display())),
                path,
                passphrase: None,
            })
            .collect();
        if identities.is_empty() {
            None
        } else {
            Some(Self::new(name, identities))
        }
    }
}

#[async_trait]
impl IdentitySource for KeyFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn identities(&self) -> Result<Vec<Identity>, TransportError> {
        Ok(self.identities.clone())
    }
}

/// Keys listed in an environment variable (`HOPSHARE_IDENTITY` by default)
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvKeyProvider {
    fn default() -> Self {
        Self::new(IDENTITY_ENV)
    }
}

#[async_trait]
impl IdentityProvider for EnvKeyProvider {
    fn name(&self) -> &str {
        &self.var
    }

    async fn open(&self) -> Result<Arc<dyn IdentitySource>, TransportError> {
        let value = std::env::var_os(&self.var).ok_or_else(|| {
            TransportError::AuthenticationFailed(format!("{} is not set", self.var))
        })?;
        let source = KeyFileSource::from_existing(&self.var, std::env::split_paths(&value))
            .ok_or_else(|| {
                TransportError::AuthenticationFailed(format!(
                    "{} lists no readable key files",
                    self.var
                ))
            })?;
        Ok(Arc::new(source))
    }
}

/// The usual key files in a directory (`~/.ssh` by default)
#[derive(Debug, Clone)]
pub struct DefaultKeysProvider {
    dir: Option<PathBuf>,
}

impl DefaultKeysProvider {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: Some(dir.as_ref().to_path_buf()),
        }
    }
}

impl Default for DefaultKeysProvider {
    fn default() -> Self {
        Self {
            dir: dirs::home_dir().map(|home| home.join(".ssh")),
        }
    }
}

#[async_trait]
impl IdentityProvider for DefaultKeysProvider {
    fn name(&self) -> &str {
        "default keys"
    }

    async fn open(&self) -> Result<Arc<dyn IdentitySource>, TransportError> {
        let dir = self.dir.as_ref().ok_or_else(|| {
            TransportError::AuthenticationFailed("no home directory".to_string())
        })?;
        let source = KeyFileSource::from_existing(
            self.name(),
            DEFAULT_KEY_FILES.iter().map(|file| dir.join(file)),
        )
        .ok_or_else(|| {
            TransportError::AuthenticationFailed(format!("no key files in {}", dir.display()))
        })?;
        Ok(Arc::new(source))
    }
}

/// Environment keys first, then the default key files
pub fn default_identity_chain() -> IdentityChain {
    IdentityChain::new(vec![
        Arc::new(EnvKeyProvider::default()),
        Arc::new(DefaultKeysProvider::default()),
    ])
}
