//! hopshare CLI
//!
//! Opens SSH tunnels and jump chains described by named profiles, sharing
//! one connection per destination between every consumer in the process.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hopshare::commands;
use hopshare::output::print_error;

#[derive(Parser)]
#[command(name = "hopshare")]
#[command(author, version, about = "Shared SSH tunnels through jump hosts")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "HOPSHARE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a profile's hops and forward, hold until Ctrl+C
    Open {
        /// Profile name
        profile: String,
    },

    /// Download a file from a profile's final hop
    Get {
        /// Profile name
        profile: String,
        /// Remote path
        remote: String,
        /// Local destination
        local: PathBuf,
    },

    /// Upload a file to a profile's final hop
    Put {
        /// Profile name
        profile: String,
        /// Local file
        local: PathBuf,
        /// Remote destination
        remote: String,
    },

    /// List configured profiles
    Profiles {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show configuration file path
    Path,
    /// Show effective configuration
    Show,
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, closing sessions...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, closing sessions...");
            }
        }

        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_ref();
    let shutdown = CancellationToken::new();

    match cli.command {
        Commands::Open { profile } => {
            spawn_signal_handler(shutdown.clone());
            commands::open_command(config, &profile, &shutdown).await
        }
        Commands::Get {
            profile,
            remote,
            local,
        } => {
            spawn_signal_handler(shutdown.clone());
            commands::get_command(config, &profile, &remote, &local, &shutdown).await
        }
        Commands::Put {
            profile,
            local,
            remote,
        } => {
            spawn_signal_handler(shutdown.clone());
            commands::put_command(config, &profile, &local, &remote, &shutdown).await
        }
        Commands::Profiles { json } => commands::profiles_command(config, json),
        Commands::Config { action } => match action {
            ConfigAction::Path => commands::config_path(config),
            ConfigAction::Show => commands::config_show(config),
        },
    }
}
