use std::net::SocketAddr;

use axum::{
    extract::{ws::Message, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use shared::error::{ApiError, ErrorCode};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::app_state::{AppState, StatusSnapshot};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/qr", get(qr))
        .route("/events", get(events_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control: listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status().await)
}

async fn qr(State(state): State<AppState>) -> Result<Response, (StatusCode, Json<ApiError>)> {
    match tokio::fs::read(state.qr_path()).await {
        Ok(svg) => Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new(ErrorCode::NotFound, "no QR code pending")),
        )),
        Err(err) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(ErrorCode::Internal, err.to_string())),
        )),
    }
}

async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| events_connection(state, socket))
}

/// Streams provider events as JSON text frames until the client goes away.
async fn events_connection(state: AppState, socket: axum::extract::ws::WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events_rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "control: event stream client lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
