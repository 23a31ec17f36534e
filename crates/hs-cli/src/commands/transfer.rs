//! File transfer commands
//!
//! Both open the profile's chain without its forward, stream one file
//! to or from the final hop and release the chain.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::chain::{build_registry, load_profiles, Chain};
use crate::output::print_success;

enum Direction<'a> {
    Get { remote: &'a str, local: &'a Path },
    Put { local: &'a Path, remote: &'a str },
}

async fn run(
    config_path: Option<&PathBuf>,
    name: &str,
    direction: Direction<'_>,
    shutdown: &CancellationToken,
) -> Result<u64> {
    let (_, loaded) = load_profiles(config_path)?;
    let profile = loaded.profile(name)?;
    let registry = build_registry(&loaded);

    let mut chain = Chain::open(&registry, shutdown, name, profile, false).await?;
    let transferred = async {
        let session = chain.final_hop(shutdown).await?;
        let bytes = match &direction {
            Direction::Get { remote, local } => {
                let mut file = tokio::fs::File::create(local)
                    .await
                    .with_context(|| format!("Failed to create {:?}", local))?;
                session.get_file(remote, &mut file, shutdown).await
            }
            Direction::Put { local, remote } => {
                let mut file = tokio::fs::File::open(local)
                    .await
                    .with_context(|| format!("Failed to open {:?}", local))?;
                session.put_file(&mut file, remote, shutdown).await
            }
        };
        bytes.map_err(anyhow::Error::from)
    }
    .await;

    let released = chain.release(&CancellationToken::new()).await;
    let bytes = transferred?;
    released?;
    Ok(bytes)
}

/// Download `remote` from the profile's final hop into `local`
pub async fn get_command(
    config_path: Option<&PathBuf>,
    name: &str,
    remote: &str,
    local: &Path,
    shutdown: &CancellationToken,
) -> Result<()> {
    let bytes = run(config_path, name, Direction::Get { remote, local }, shutdown)
        .await
        .with_context(|| format!("Failed to download {}", remote))?;
    print_success(&format!("Downloaded {} ({} bytes) to {:?}", remote, bytes, local));
    Ok(())
}

/// Upload `local` to `remote` on the profile's final hop
pub async fn put_command(
    config_path: Option<&PathBuf>,
    name: &str,
    local: &Path,
    remote: &str,
    shutdown: &CancellationToken,
) -> Result<()> {
    let bytes = run(config_path, name, Direction::Put { local, remote }, shutdown)
        .await
        .with_context(|| format!("Failed to upload {:?}", local))?;
    print_success(&format!("Uploaded {:?} ({} bytes) to {}", local, bytes, remote));
    Ok(())
}
