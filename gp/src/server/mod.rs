//! HTTP surface
//!
//! Read-only views of the registry, on-demand checks, reload and shutdown.
//! Every handler goes through the `ReloadCoordinator`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::coordinator::ReloadCoordinator;

mod routes;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReloadCoordinator>,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(coordinator: Arc<ReloadCoordinator>, shutdown: Arc<Notify>) -> Self {
        Self { coordinator, shutdown }
    }
}

/// Create the application router
pub fn create_app(state: AppState) -> Router {
    routes::create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `state.shutdown` is notified
pub async fn serve(listener: TcpListener, state: AppState) -> eyre::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "Listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(async move {
            shutdown.notified().await;
            info!("HTTP server received shutdown signal");
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
