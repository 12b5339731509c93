use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};

use crate::monitor::{MonitorServer, MonitorSignalingHandler, ServerMessage};

pub async fn handle_monitor_websocket(websocket: WebSocket, server: Arc<MonitorServer>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let mut signaling_handler = MonitorSignalingHandler::new(server, tx);
    let connection_id = signaling_handler.connection_id().to_string();
    tracing::info!(connection_id = %connection_id, "New monitor WebSocket connection established");

    // Spawn task to send messages to client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server message");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::text(text)).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                if let Ok(text) = message.to_str() {
                    signaling_handler.handle_text(text).await;
                }
            }
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    signaling_handler.cleanup().await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "Monitor WebSocket connection closed");
}
