use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tracing::debug;

/// GET /echo
pub async fn upgrade(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(echo)
}

/// Send every data frame straight back, in the order received.
async fn echo(mut socket: WebSocket) {
    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!("WebSocket read error: {}", e);
                return;
            }
        };

        match msg {
            Message::Text(_) | Message::Binary(_) => {
                if let Err(e) = socket.send(msg).await {
                    debug!("WebSocket write error: {}", e);
                    return;
                }
            }
            Message::Close(_) => return,
            // The protocol layer answers pings itself.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}
