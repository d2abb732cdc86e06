//! Cohome - real-time share negotiation server
//!
//! Serves the negotiation API and per-session event streams over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cohome_core::Database;
use cohome_net::{AppState, Server};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "cohome", about = "Real-time share negotiation server")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Override the SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cohome=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), version = db.schema_version(), "Database ready");

    let state = Arc::new(AppState::new(db, config.server_config()));
    let server = Server::start(config.listen, state).await?;
    tracing::info!(addr = %server.addr(), "Starting Cohome");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received");
    server.shutdown();
    server.wait().await;

    Ok(())
}
