//! WebSocket transport
//!
//! Each upgraded socket becomes one registry session. A writer task drains the
//! session's outbound queue; the reader loop hands text frames to the engine.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use super::server::AppState;

/// Upgrade handler for `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let engine = state.engine;
    let (session, mut outbound) = engine.connect();
    tracing::info!(session = %session, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Text((&*frame).into())).await {
                tracing::debug!(session = %session, error = %e, "WebSocket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => engine.handle_text(session, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session = %session, error = %e, "WebSocket read failed");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    engine.disconnect(session);
    writer.abort();
    tracing::info!(session = %session, "WebSocket disconnected");
}
