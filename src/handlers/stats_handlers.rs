//! Live stats over WebSocket and Prometheus text on `/metrics`.

use crate::{
    AppState,
    services::stats::{StatsSnapshot, StorageUsage},
};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tracing::{debug, warn};

async fn current_snapshot(state: &AppState) -> StatsSnapshot {
    let usage = match state.storage.usage().await {
        Ok((objects, bytes)) => StorageUsage { objects, bytes },
        Err(err) => {
            warn!("storage usage unavailable: {}", err);
            StorageUsage::default()
        }
    };
    state.stats.snapshot(usage)
}

/// GET `/metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    let body = current_snapshot(&state).await.to_prometheus();
    let mut response = body.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

/// WS `/ws/stats`
pub async fn stats_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| push_stats(socket, state))
}

/// Send a snapshot every interval until the client goes away.
async fn push_stats(mut socket: WebSocket, state: AppState) {
    let every = Duration::from_secs(state.config.stats_interval_secs.max(1));
    let mut ticker = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = current_snapshot(&state).await;
                let text = match serde_json::to_string(&snapshot) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("encoding stats snapshot: {}", err);
                        break;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("stats socket closed");
}
