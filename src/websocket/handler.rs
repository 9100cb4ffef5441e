use std::sync::Arc;
use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::app::AppState;
use crate::models::{RelayError, ServerEvent};
use crate::ws::Session;

/// WebSocket handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(app_state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection attempt");
    let limit = app_state.config.max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Everything addressed to this client goes through one bounded queue.
    // A join needs room for the snapshot and the chat history.
    let (outbox, mut inbox) =
        mpsc::channel::<Arc<ServerEvent>>(app_state.config.session_queue_capacity.max(2));
    let mut session = Session::new(app_state.relay.clone(), outbox);
    let session_id = session.id();
    info!("WebSocket connection established with session_id: {}", session_id);

    // Writer task: drain the queue into the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let text = match serde_json::to_string(&*event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize event for session {}: {}", session_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames are handled one at a time, in arrival order.
    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => session.handle_frame(&text).await,
                Some(Ok(Message::Binary(_))) => {
                    debug!("Binary frame from session {}", session_id);
                    session.handle_frame_error(RelayError::MalformedEvent("binary frames are not supported".to_string())).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("WebSocket error on session {}: {}", session_id, e);
                    break;
                }
            },
            _ = &mut send_task => {
                debug!("Writer for session {} stopped", session_id);
                break;
            }
        }
    }

    session.close().await;
    send_task.abort();
    info!("WebSocket connection terminated for session_id: {}", session_id);
}
