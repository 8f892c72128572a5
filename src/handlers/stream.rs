//! Detection stream WebSocket handler

use std::sync::Arc;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};

use crate::AppState;
use crate::engine::Multiplexer;

// WebSocket upgrade handler for /ws/stream
pub async fn stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let multiplexer = Arc::clone(&state.multiplexer);
    ws.on_upgrade(move |socket| handle_socket(socket, multiplexer))
}

async fn handle_socket(socket: WebSocket, multiplexer: Arc<Multiplexer>) {
    let subscription = multiplexer.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = subscription.next_frame() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sender.send(Message::Text(frame.to_string())).await {
                    subscription.fail(&e.to_string());
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                // Client messages carry no meaning on this channel
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(subscriber = %subscription.id(), "WebSocket receive error: {}", e);
                    break;
                }
            },
        }
    }

    // Server-side close (shutdown); ignore errors if the peer is already gone
    let _ = sender.send(Message::Close(None)).await;
    tracing::info!(
        subscriber = %subscription.id(),
        state = ?subscription.state(),
        dropped = subscription.dropped(),
        "WebSocket connection terminated"
    );
}
