use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::connection;
use crate::registry::RegistryStats;
use crate::router::Relay;

/// HTTP surface of the relay: the WebSocket endpoint on `/` and `/ws`, plus
/// `/health` with the registry counters.
pub fn router(relay: Relay) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(relay)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the relay on an already-bound listener until the process ends.
pub async fn serve(listener: TcpListener, relay: Relay) -> std::io::Result<()> {
    axum::serve(listener, router(relay)).await
}

async fn ws_upgrade(State(relay): State<Relay>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, relay))
}

async fn health(State(relay): State<Relay>) -> Json<RegistryStats> {
    Json(relay.stats())
}
