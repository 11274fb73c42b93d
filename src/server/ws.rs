// =============================================================================
// WebSocket Viewer Feed — event-driven push + request/response queries
// =============================================================================
//
// Grounded on the teacher's axum WebSocketUpgrade handler and query-param
// bearer auth, but the push side is event-driven rather than a polling loop:
// each connection subscribes directly to the bus topics a viewer cares about
// and forwards every delivery as a typed JSON push message over an outbound
// mpsc channel. The recv side dispatches `{type, request_id, data}` requests
// against the broker and store and replies with a response carrying the same
// `request_id`.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bus::{Event, SubscriberId, Topic};
use crate::error::EngineError;
use crate::server::auth::validate_token;
use crate::server::protocol::{
    ClientRequest, DefaultViewportData, PositionView, PushMessage, QueryCandlesData,
    QueryCandlesResponseData, QueryEventsData, QueryEventsResponseData, ServerResponse,
};
use crate::server::ServerState;

const PUSH_TOPICS: [Topic; 6] = [
    Topic::TRADE_PRINT,
    Topic::ORDER_PLACED,
    Topic::ORDER_FILLED,
    Topic::ORDER_REJECTED,
    Topic::POSITION_UPDATED,
    Topic::RUN_START,
];

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/v1/ws", get(ws_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_handler(
    Query(query): Query<WsQuery>,
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("websocket upgrade rejected: invalid or missing token");
        return (axum::http::StatusCode::FORBIDDEN, "invalid token").into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

fn iso_ms(event_time: i64) -> String {
    Utc.timestamp_millis_opt(event_time)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

fn to_push(event: &Event) -> Option<PushMessage> {
    match event {
        Event::TradePrint(t) => Some(PushMessage::ProviderTick {
            symbol: t.symbol.clone(),
            price: t.price,
            timestamp_iso: iso_ms(t.event_time),
        }),
        Event::OrderPlaced(e) => Some(PushMessage::OrderPlaced {
            order_id: e.order_id,
            symbol: e.symbol.clone(),
            qty: e.qty,
            side: e.side.to_string(),
            limit_price: e.limit_price,
            status: "WORKING",
            timestamp_iso: iso_ms(e.event_time),
            ms: e.event_time,
        }),
        Event::OrderFilled(e) => Some(PushMessage::OrderFilled {
            order_id: e.order_id,
            symbol: e.symbol.clone(),
            filled_qty: e.filled_qty,
            fill_price: e.fill_price,
            side: e.side.to_string(),
            status: "FILLED",
            timestamp_iso: iso_ms(e.event_time),
            ms: e.event_time,
        }),
        Event::OrderRejected(e) => Some(PushMessage::OrderRejected {
            order_id: e.order_id,
            symbol: e.symbol.clone(),
            qty: e.qty,
            side: e.side.to_string(),
            reason: e.reason.clone(),
            timestamp_iso: iso_ms(e.event_time),
            ms: e.event_time,
        }),
        Event::PositionUpdated(e) => Some(PushMessage::PositionUpdated {
            symbol: e.symbol.clone(),
            qty: e.qty,
            avg_price: e.avg_price,
            timestamp_iso: iso_ms(e.event_time),
        }),
        Event::RunStart(e) => Some(PushMessage::RunStart {
            run_id: e.run_id.clone(),
            timestamp_iso: e.timestamp_iso.clone(),
            starting_balance: e.starting_balance,
        }),
        _ => None,
    }
}

async fn handle_connection(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    if let Some(run_id) = state.engine.run_id() {
        let snapshot = PushMessage::RunStart {
            run_id,
            timestamp_iso: Utc::now().to_rfc3339(),
            starting_balance: state.engine.broker.get_balance(),
        };
        if let Ok(text) = serde_json::to_string(&snapshot) {
            let _ = tx.send(text);
        }
    }

    let bus = state.engine.bus.clone();
    let mut subscriptions: Vec<(Topic, SubscriberId)> = Vec::new();
    for topic in PUSH_TOPICS {
        let tx = tx.clone();
        let id = bus.subscribe(topic, move |event| {
            if let Some(push) = to_push(event) {
                if let Ok(text) = serde_json::to_string(&push) {
                    let _ = tx.send(text);
                }
            }
        });
        subscriptions.push((topic, id));
    }

    let mut outbound = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(response) = dispatch_request(&state, &text) {
                            let _ = tx.send(response);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive error");
                        break;
                    }
                }
            }
            _ = &mut outbound => break,
        }
    }

    for (topic, id) in subscriptions {
        bus.unsubscribe(topic, id);
    }
    outbound.abort();
    info!("websocket connection closed");
}

fn dispatch_request(state: &Arc<ServerState>, raw: &str) -> Option<String> {
    let request: ClientRequest = match serde_json::from_str(raw) {
        Ok(r) => r,
        Err(e) => {
            let err = EngineError::Protocol(format!("malformed client request: {e}"));
            warn!(error = %err, "failed to parse client request");
            return None;
        }
    };

    let response_json = match request.kind.as_str() {
        "QueryCandles" => handle_query_candles(state, &request),
        "QueryEvents" => handle_query_events(state, &request),
        "QueryOrders" => handle_query_orders(state, &request),
        "QueryPositions" => handle_query_positions(state, &request),
        "QueryDefaultViewport" => handle_query_default_viewport(state, &request),
        other => {
            let err = EngineError::Protocol(format!("unknown request type: {other}"));
            warn!(error = %err, kind = other, "unknown request type");
            serde_json::to_string(&ServerResponse::<()>::err(
                format!("{other}Response"),
                request.request_id.clone(),
                "UnknownRequestType",
            ))
        }
    };

    response_json.ok()
}

fn handle_query_candles(state: &Arc<ServerState>, req: &ClientRequest) -> serde_json::Result<String> {
    let data: QueryCandlesData = match serde_json::from_value(req.data.clone()) {
        Ok(d) => d,
        Err(e) => {
            let err = EngineError::Protocol(format!("malformed QueryCandles request: {e}"));
            warn!(error = %err, "rejecting malformed request");
            return serde_json::to_string(&ServerResponse::<()>::err(
                "QueryCandlesResponse",
                req.request_id.clone(),
                format!("BadRequest: {e}"),
            ));
        }
    };

    let limit = data.limit.unwrap_or(usize::MAX);
    let candles = state
        .engine
        .store
        .query_candles(&data.symbol, data.resolution_ms, data.start_ms, data.end_ms);
    let is_truncated = candles.len() > limit;
    let candles: Vec<_> = candles.into_iter().take(limit).collect();

    serde_json::to_string(&ServerResponse::ok(
        "QueryCandlesResponse",
        req.request_id.clone(),
        QueryCandlesResponseData {
            symbol: data.symbol,
            resolution_ms: data.resolution_ms,
            count: candles.len(),
            candles,
            is_truncated,
        },
    ))
}

fn handle_query_events(state: &Arc<ServerState>, req: &ClientRequest) -> serde_json::Result<String> {
    let data: QueryEventsData = match serde_json::from_value(req.data.clone()) {
        Ok(d) => d,
        Err(e) => {
            let err = EngineError::Protocol(format!("malformed QueryEvents request: {e}"));
            warn!(error = %err, "rejecting malformed request");
            return serde_json::to_string(&ServerResponse::<()>::err(
                "QueryEventsResponse",
                req.request_id.clone(),
                format!("BadRequest: {e}"),
            ));
        }
    };

    let limit = data.limit.unwrap_or(usize::MAX);
    let events = state
        .engine
        .store
        .query_events(&data.symbol, data.start_ms, data.end_ms, data.event_types.as_deref());
    let is_truncated = events.len() > limit;
    let events: Vec<_> = events.into_iter().take(limit).collect();

    serde_json::to_string(&ServerResponse::ok(
        "QueryEventsResponse",
        req.request_id.clone(),
        QueryEventsResponseData {
            symbol: data.symbol,
            count: events.len(),
            events,
            is_truncated,
        },
    ))
}

fn handle_query_orders(state: &Arc<ServerState>, req: &ClientRequest) -> serde_json::Result<String> {
    let orders = state.engine.broker.get_orders();
    serde_json::to_string(&ServerResponse::ok(
        "QueryOrdersResponse",
        req.request_id.clone(),
        orders,
    ))
}

fn handle_query_positions(state: &Arc<ServerState>, req: &ClientRequest) -> serde_json::Result<String> {
    let positions = PositionView::from_map(&state.engine.broker.get_positions());
    serde_json::to_string(&ServerResponse::ok(
        "QueryPositionsResponse",
        req.request_id.clone(),
        positions,
    ))
}

fn handle_query_default_viewport(state: &Arc<ServerState>, req: &ClientRequest) -> serde_json::Result<String> {
    let symbol = state
        .engine
        .config()
        .symbols
        .first()
        .cloned()
        .unwrap_or_default();

    let end_ms = match state.engine.store.max_event_time_ms(&symbol) {
        Some(ms) => ms,
        None => {
            return serde_json::to_string(&ServerResponse::<()>::err(
                "QueryDefaultViewportResponse",
                req.request_id.clone(),
                "NoDataYet",
            ))
        }
    };
    let start_ms = end_ms - 24 * 60 * 60 * 1000;

    serde_json::to_string(&ServerResponse::ok(
        "QueryDefaultViewportResponse",
        req.request_id.clone(),
        DefaultViewportData {
            symbol,
            start_ms,
            end_ms,
        },
    ))
}
