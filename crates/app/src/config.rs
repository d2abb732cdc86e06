//! Configuration for the cohome server binary
//!
//! Loaded from a TOML file. A missing default file yields the built-in
//! defaults; an explicitly named file must exist.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use cohome_core::NegotiationPolicy;
use cohome_net::{ServerConfig, DEFAULT_PORT};
use directories::ProjectDirs;
use serde::Deserialize;
use uuid::Uuid;

const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "cohome.db";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to
    pub listen: SocketAddr,
    /// SQLite file; defaults to the platform data directory
    pub database_path: Option<PathBuf>,
    pub heartbeat_interval_secs: u64,
    /// Queued push messages per channel before it is pruned
    pub channel_capacity: usize,
    /// Sessions whose event streams skip authentication
    pub sandbox_sessions: Vec<Uuid>,
    pub negotiation: NegotiationPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            database_path: None,
            heartbeat_interval_secs: 30,
            channel_capacity: 64,
            sandbox_sessions: Vec::new(),
            negotiation: NegotiationPolicy::default(),
        }
    }
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from("dev", "cohome", "cohome").context("could not determine home directory")
}

impl Config {
    /// Load from `path`, or from the platform config directory when absent
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = project_dirs()?.config_dir().join(CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    tracing::debug!(path = %default_path.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_secs == 0 {
            bail!("heartbeat_interval_secs must be at least 1");
        }
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be at least 1");
        }
        self.negotiation.validate()?;
        Ok(())
    }

    /// Configured database file, or `cohome.db` in the platform data directory
    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join(DATABASE_FILE)),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            channel_capacity: self.channel_capacity,
            sandbox_sessions: self.sandbox_sessions.iter().copied().collect::<HashSet<_>>(),
            policy: self.negotiation,
        }
    }
}
