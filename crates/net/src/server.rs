//! HTTP server for the negotiation core
//!
//! Serves the request/response API and the per-session push channels.
//! Shutdown is broadcast to the accept loop and every open push channel.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api;
use crate::error::Result;
use crate::state::AppState;

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/intentions",
            get(api::get_intentions).post(api::set_intentions),
        )
        .route("/api/negotiations", post(api::create_session))
        .route("/api/negotiations/status", get(api::completion_status))
        .route("/api/negotiations/{id}", get(api::get_session))
        .route(
            "/api/negotiations/{id}/participant",
            patch(api::update_participant),
        )
        .route("/api/negotiations/{id}/abandon", post(api::abandon_session))
        .route("/api/negotiations/{id}/history", get(api::session_history))
        .route("/api/negotiations/{id}/events", get(api::session_events))
        .route("/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Running server handle
pub struct Server {
    addr: SocketAddr,
    state: Arc<AppState>,
    handle: JoinHandle<()>,
}

impl Server {
    /// Bind and start serving. Port 0 picks a free port.
    pub async fn start(addr: SocketAddr, state: Arc<AppState>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Server started");

        let app = router(state.clone());
        let shutdown_rx = state.subscribe_shutdown();
        let handle = tokio::spawn(serve(listener, app, shutdown_rx));

        Ok(Server {
            addr: bound_addr,
            state,
            handle,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Shutdown the server and close every push channel
    pub fn shutdown(&self) {
        self.state.shutdown();
        info!("Server shutdown initiated");
    }

    /// Wait for the server task to finish
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "Server task failed");
        }
    }
}

async fn serve(listener: TcpListener, app: Router, mut shutdown_rx: broadcast::Receiver<()>) {
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await;

    match result {
        Ok(()) => info!("Server stopped"),
        Err(e) => error!(error = %e, "Server error"),
    }
}
