//! CLI command implementations

mod chain;
mod config;
mod open;
mod profiles;
mod transfer;

pub use chain::{build_registry, load_profiles, Chain};
pub use config::{config_path, config_show};
pub use open::open_command;
pub use profiles::profiles_command;
pub use transfer::{get_command, put_command};
