//! credrotor CLI
//!
//! Operator commands for an application whose client secret is rotated by
//! `credrotord`.
//!
//! # Usage
//!
//! ```bash
//! # List the application's password credentials
//! credrotor show
//!
//! # Create and activate a new credential now
//! credrotor rotate
//!
//! # Check that the stored secret still authenticates
//! credrotor probe
//!
//! # Print an access token for the Graph API
//! credrotor token --format json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::FmtSubscriber;

mod commands;

#[derive(Parser)]
#[command(name = "credrotor")]
#[command(about = "Client secret rotation for registered directory applications")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the application's password credentials
    Show,

    /// Create and activate a new credential regardless of the current one
    Rotate,

    /// Validate the stored (or configured) secret against the directory
    Probe,

    /// Acquire an access token with the active secret
    Token {
        /// Scope to request (repeatable); defaults to the Graph `.default` scope
        #[arg(short, long)]
        scope: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete the locally stored secret for the tenant
    Forget {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        FmtSubscriber::builder()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    let services = commands::load_services(cli.config)?;

    match cli.command {
        Commands::Show => commands::show(&services).await,
        Commands::Rotate => commands::rotate(&services).await,
        Commands::Probe => commands::probe(&services).await,
        Commands::Token { scope, format } => commands::token(&services, scope, &format).await,
        Commands::Forget { force } => commands::forget(&services, force).await,
    }
}
