//! Cohome Network Library
//!
//! HTTP surface and real-time fan-out for share negotiations.
//!
//! # Architecture
//!
//! - **Registry**: in-memory map of open push channels per session
//! - **Gateway**: opens, heartbeats and tears down one push channel
//! - **API**: request/response mutations that broadcast through the registry
//! - **Protocol**: JSON push messages delivered as server-sent events
//!
//! # Usage
//!
//! ```ignore
//! let state = Arc::new(AppState::new(Database::open("cohome.db")?, ServerConfig::default()));
//! let server = Server::start("127.0.0.1:8787".parse()?, state).await?;
//!
//! // Later
//! server.shutdown();
//! server.wait().await;
//! ```

pub mod api;
pub mod auth;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod state;

pub use auth::CurrentUser;
pub use error::{ApiError, Error, Result};
pub use extract::{ApiJson, ApiPath, ApiQuery};
pub use gateway::{Gateway, GatewayConnection, PresenceSink};
pub use protocol::{ConnectionId, PushMessage};
pub use registry::{Channel, SessionRegistry};
pub use server::{router, Server};
pub use state::{AppState, ServerConfig};

/// Default listen port
pub const DEFAULT_PORT: u16 = 8787;
