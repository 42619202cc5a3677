//! integrasync web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Status and health endpoints
//! - External system registry and connection tests
//! - Integration task, mapping and run-trigger API
//! - Event log and dashboard API
//! - WebSocket endpoint streaming events as they are recorded

pub mod api;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use integrasync_core::ControlPlane;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub control: ControlPlane,
    /// Broadcast channel feeding `/ws` subscribers.
    pub ws_broadcast: broadcast::Sender<String>,
    pub started_at: Instant,
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a web server over `control`. Messages sent on `ws_broadcast`
    /// are forwarded to every WebSocket client.
    pub fn new(control: ControlPlane, ws_broadcast: broadcast::Sender<String>) -> Self {
        let state = Arc::new(AppState {
            control,
            ws_broadcast,
            started_at: Instant::now(),
        });
        Self { state }
    }

    /// Get a clone of the broadcast sender for pushing messages.
    pub fn broadcast_sender(&self) -> broadcast::Sender<String> {
        self.state.ws_broadcast.clone()
    }

    /// The full application router, without a listener.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        Router::new()
            .merge(api::status::routes())
            .merge(api::dashboard::routes())
            .merge(api::systems::routes())
            .merge(api::tasks::routes())
            .merge(api::mappings::routes())
            .merge(api::events::routes())
            .merge(ws::routes())
            .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the web server, listening on the given address.
    pub async fn start(self, listen_addr: &str) -> anyhow::Result<()> {
        let addr: SocketAddr = listen_addr.parse()?;
        let app = self.router();

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
