use std::sync::Arc;

use axum::extract::ws::Message;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use crate::insights::InsightsClient;
use crate::store::GuardStore;
use crate::trigger::SharedMonitor;

/// Shared handles for the web handlers. Cheap to clone per request.
#[derive(Clone)]
pub struct WebState {
    pub store: Arc<GuardStore>,
    pub monitor: SharedMonitor,
    pub insights: Arc<InsightsClient>,
    pub admin_passwords: Arc<Vec<String>>,
}

/// Live mirror of the store: every change event is forwarded to the
/// socket as one tagged JSON message.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WebState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, state: WebState) {
    let (mut sender, _) = socket.split();
    let mut rx = state.store.subscribe();

    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Ok(json) = serde_json::to_string(&event) {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
            // A slow socket misses old events but keeps receiving new ones.
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
