//! WebSocket endpoint: one socket connection, one core session.
//!
//! The socket splits into a reader and a writer. The writer is a spawned
//! task draining the session's outbound frame channel; the reader runs
//! inline, mapping socket messages onto [`InboundFrame`]s. Dropping the
//! inbound sender is how the session learns about a disconnect.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use colloquy_core::{
    FrameSink, InboundFrame, OutboundFrame, SessionConfig, SessionEngines, SessionOrchestrator,
};

/// Inbound frames buffered between the socket reader and the session.
const INBOUND_BUFFER: usize = 64;

/// Shared per-process state: the collaborator set and session tuning.
#[derive(Clone)]
pub struct AppState {
    pub engines: SessionEngines,
    pub config: SessionConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/converse", get(ws_upgrade))
        .route("/healthz", get(|| async { "ok" }))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frames, mut frame_rx) = FrameSink::channel();

    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let message = match frame {
                OutboundFrame::Audio(bytes) => Message::Binary(bytes.into()),
                other => match other.to_text() {
                    Some(text) => Message::Text(text.into()),
                    None => continue,
                },
            };
            if ws_tx.send(message).await.is_err() {
                debug!("websocket writer: peer gone");
                return;
            }
        }
        // Session dropped its sink: the conversation is over.
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let session = SessionOrchestrator::new(state.config.clone(), state.engines.clone(), frames);
    let session_id = session.id();
    info!(session_id, "websocket session accepted");

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let session_task = tokio::spawn(session.run(inbound_rx));

    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(err) => {
                warn!(session_id, error = %err, "websocket receive error");
                break;
            }
        };
        let frame = match message {
            Message::Text(text) => InboundFrame::Text(text.to_string()),
            Message::Binary(bytes) => InboundFrame::Binary(bytes.to_vec()),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if inbound_tx.send(frame).await.is_err() {
            // Session finished its turn; nothing left to feed.
            break;
        }
    }

    drop(inbound_tx);
    match session_task.await {
        Ok(Ok(())) => debug!(session_id, "session completed"),
        Ok(Err(err)) => warn!(session_id, error = %err, "session ended with error"),
        Err(join_err) => warn!(session_id, error = %join_err, "session task died"),
    }
    let _ = writer.await;
    info!(session_id, "websocket session closed");
}
