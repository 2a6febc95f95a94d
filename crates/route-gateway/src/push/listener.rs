//! WebSocket session for one map-update listener.

use super::broadcaster::RouteBroadcaster;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Forward updates to the socket until either side goes away. Inbound
/// frames other than Close are ignored; pings are answered by axum.
pub async fn serve_listener(socket: WebSocket, broadcaster: Arc<RouteBroadcaster>) {
    let (listener_id, mut updates) = broadcaster.register();
    info!(listener_id = %listener_id, "Map listener connected");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!(listener_id = %listener_id, error = %e, "Map listener send failed");
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    broadcaster.unregister(&listener_id);
    info!(listener_id = %listener_id, "Map listener disconnected");
}
