//! The plugin's WebSocket endpoint.
//!
//! Each accepted socket becomes the registry's live connection. Outbound
//! frames flow through an unbounded channel drained by a writer task; inbound
//! text frames go to the [`MessageRouter`] and any deferred Claude work is
//! spawned so the read loop keeps going.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::protocol::OutboundMessage;
use crate::router::MessageRouter;
use crate::AppState;

const GREETING: &str = "Bridge connected!";

/// GET / on the plugin port: upgrade to a WebSocket.
pub(super) async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_plugin_socket(socket, state))
}

async fn handle_plugin_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let conn_id = state.registry.attach(tx);

    state.send_to_plugin(&OutboundMessage::ConnectionEstablished {
        has_api_key: state.credential.has_key(),
        message: GREETING.to_string(),
    });

    // Writer: drain the registry channel into the socket; close on shutdown
    let writer_state = state.clone();
    let send_task = tokio::spawn(async move {
        let shutdown = writer_state.shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(text) => {
                        if ws_sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Replaced by a newer connection: stay open, nothing more to write
                    None => {
                        (&mut shutdown).await;
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = &mut shutdown => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let router = MessageRouter::new(state.clone());
    let shutdown = state.shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(work) = router.handle_text(text.as_str()) {
                        tokio::spawn(work);
                    }
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        if let Some(work) = router.handle_text(text) {
                            tokio::spawn(work);
                        }
                    }
                    Err(_) => tracing::warn!("Dropping non-UTF-8 binary frame ({} bytes)", data.len()),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Plugin socket error: {e}");
                    break;
                }
            },
            _ = &mut shutdown => {
                // Give the writer a moment to deliver the close frame
                let _ = tokio::time::timeout(std::time::Duration::from_secs(1), ws_receiver.next()).await;
                break;
            }
        }
    }

    state.registry.detach(conn_id);
    send_task.abort();
}
