//! Configuration commands

use anyhow::{Context, Result};
use std::path::PathBuf;

use hs_core::config::{self, HopshareConfig};

use crate::output::{print_info, print_warning};

fn resolve(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Print the configuration file location
pub fn config_path(config_path: Option<&PathBuf>) -> Result<()> {
    println!("{}", resolve(config_path).display());
    Ok(())
}

/// Show the effective configuration, defaults filled in
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve(config_path);

    let effective = if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
        config::load_config::<HopshareConfig>(&path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?
    } else {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Showing built-in defaults");
        HopshareConfig::default()
    };
    println!();

    let content = toml::to_string_pretty(&effective).context("Failed to render configuration")?;
    println!("{}", content);
    Ok(())
}
