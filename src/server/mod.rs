// =============================================================================
// Query Server — REST health surface + event-driven WebSocket viewer feed
// =============================================================================
//
// Mounted alongside the Engine, never in front of it: the server only reads
// from the bus, broker and store the Engine already owns. It never calls
// into the broker or provider to change state.
// =============================================================================

pub mod auth;
pub mod protocol;
pub mod rest;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::engine::Engine;

/// Shared state handed to every route handler.
pub struct ServerState {
    pub engine: Arc<Engine>,
}

/// Build the full router: REST health surface plus the WebSocket viewer feed.
pub fn router(engine: Arc<Engine>) -> Router {
    let state = Arc::new(ServerState { engine });
    Router::new().merge(rest::router(state.clone())).merge(ws::router(state))
}

/// Bind and serve until the process is signaled to stop. Callers typically
/// race this future against `engine.wait_for_shutdown()`.
pub async fn serve(bind_addr: &str, engine: Arc<Engine>) -> anyhow::Result<()> {
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(bind_addr, "query server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
