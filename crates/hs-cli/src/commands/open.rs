//! Open command implementation

use anyhow::Result;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::chain::{build_registry, load_profiles, Chain};
use crate::output::{format_sessions, print_info, print_success, print_warning};

/// Open a profile's chain and hold it until `shutdown` fires
pub async fn open_command(
    config_path: Option<&PathBuf>,
    name: &str,
    shutdown: &CancellationToken,
) -> Result<()> {
    let (_, loaded) = load_profiles(config_path)?;
    let profile = loaded.profile(name)?;
    let registry = build_registry(&loaded);

    let monitor = shutdown.child_token();
    let chain = Chain::open(&registry, &monitor, name, profile, true).await?;
    print_success(&format!("Opened '{}' ({} hop(s))", name, chain.len()));
    println!("{}", format_sessions(&registry.snapshots().await));

    match chain.forward().await {
        Some(forward) => print_info(&format!("Forward ready: {}", forward.to_display_string())),
        None => {
            if let Some(port) = chain.handler().jump_local_port() {
                print_info(&format!("Tunnel to the final hop on 127.0.0.1:{}", port));
            }
        }
    }
    print_info("Press Ctrl+C to close");

    shutdown.cancelled().await;

    // The original monitor is cancelled by now
    let teardown = CancellationToken::new();
    let result = chain.release(&teardown).await;
    registry
        .shutdown(&teardown, registry.settings().disconnect_timeout)
        .await;
    match &result {
        Ok(()) => print_success(&format!("Closed '{}'", name)),
        Err(e) => print_warning(&format!("Closed '{}' with errors: {:#}", name, e)),
    }
    result
}
