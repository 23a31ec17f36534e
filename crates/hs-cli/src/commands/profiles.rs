//! Profiles command implementation

use anyhow::Result;
use std::path::PathBuf;

use super::chain::load_profiles;
use crate::output::format_profiles;

/// List the profiles in the configuration file
pub fn profiles_command(config_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let (_, loaded) = load_profiles(config_path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&loaded.profiles)?);
    } else {
        println!("{}", format_profiles(&loaded.profiles));
    }
    Ok(())
}
