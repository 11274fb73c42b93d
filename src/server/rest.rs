// =============================================================================
// REST API Endpoints
// =============================================================================
//
// `/api/v1/health` is public. Everything else a viewer needs (candles,
// events, orders, positions) goes through the WebSocket request/response
// channel instead, per the push/query protocol — this router only carries
// the ambient health/summary surface.
//
// CORS is configured permissively; tighten `allow_origin` in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::server::ServerState;

pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/summary", get(summary))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

#[derive(Serialize)]
struct SummaryResponse {
    run_id: Option<String>,
    balance: f64,
    open_order_count: usize,
    shutting_down: bool,
}

async fn summary(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let engine = &state.engine;
    Json(SummaryResponse {
        run_id: engine.run_id(),
        balance: engine.broker.get_balance(),
        open_order_count: engine.broker.get_orders().len(),
        shutting_down: engine.is_shutting_down(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok() {
        let resp = health().await.into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }
}
