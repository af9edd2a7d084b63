use std::sync::Arc;
use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, Extension, State},
    response::Response,
};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::models::{ReceivedMessage, SendMessage};
use crate::services::auth_service::AuthUser;
use crate::state::AppState;
use crate::utils::scope_guard::ScopeGuard;
use crate::ws::room::ConnectionHandle;

/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    info!("New WebSocket connection attempt by user {}", user.user_id);
    ws.on_upgrade(move |socket| handle_socket(socket, user, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, user: AuthUser, state: Arc<AppState>) {
    let (conn, mut outbound) = ConnectionHandle::new(user.user_id);
    info!("WebSocket connection {} established for user {}", conn.id, user.user_id);

    // Room membership must not outlive the connection, even when this future is dropped
    let rooms = state.rooms.clone();
    let conn_id = conn.id;
    let _cleanup = ScopeGuard::new(move || {
        rooms.unsubscribe_all(conn_id);
    });

    // Split the socket into sender and receiver
    let (mut sender, receiver) = socket.split();

    // Drain the connection's outbound queue into the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize event for connection {}: {}", conn_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Read intents and hand them to the coordinator one at a time
    let (stop_reader, stop) = oneshot::channel();
    let mut recv_task = tokio::spawn(read_intents(receiver, state.clone(), conn.clone(), stop));

    // Wait for either task to finish
    let reader_finished = tokio::select! {
        _ = (&mut send_task) => false,
        _ = (&mut recv_task) => true,
    };

    if reader_finished {
        send_task.abort();
    } else {
        // The intent in flight must finish before the connection leaves its rooms
        let _ = stop_reader.send(());
        if let Err(e) = recv_task.await {
            error!("Reader of connection {} ended abnormally: {}", conn.id, e);
        }
    }

    state.coordinator.disconnect(&conn).await;
    info!("WebSocket connection {} terminated", conn.id);
}

/// Hand every text frame to the coordinator until the stream ends or `stop` fires.
/// `stop` is only observed between frames, so an intent is never cut off halfway.
async fn read_intents<S>(mut frames: S, state: Arc<AppState>, conn: ConnectionHandle, mut stop: oneshot::Receiver<()>)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut stop => break,
            frame = frames.next() => frame,
        };
        let Some(frame) = frame else { break };

        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ReceivedMessage>(&text) {
                Ok(msg) => state.coordinator.handle(&conn, msg).await,
                Err(e) => {
                    warn!("Failed to parse message on connection {}: {}", conn.id, e);
                    conn.send(SendMessage::error(format!("Invalid message: {}", e)));
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(other) => debug!("Ignoring non-text frame on connection {}: {:?}", conn.id, other),
            Err(e) => {
                error!("WebSocket error on connection {}: {}", conn.id, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::memstore::MemoryCollabStore;
    use crate::utils::clock::SystemClock;
    use assert_matches::assert_matches;
    use futures_util::stream;
    use serde_json::json;

    fn state() -> (Arc<MemoryCollabStore>, Arc<AppState>) {
        let store = Arc::new(MemoryCollabStore::new());
        store.insert_user(1, "Ada Lovelace");
        store.insert_document(10, "Paper", 1);
        let state = Arc::new(AppState::new(Config::default(), store.clone(), Arc::new(SystemClock)));
        (store, state)
    }

    fn text(value: serde_json::Value) -> Result<Message, axum::Error> {
        Ok(Message::Text(value.to_string()))
    }

    #[tokio::test]
    async fn stopped_reader_finishes_its_intent_before_disconnect() {
        let (store, state) = state();
        let (conn, mut outbound) = ConnectionHandle::new(1);
        let frames = stream::iter(vec![text(json!({ "type": "join_document", "document_id": 10, "user_id": 1 }))])
            .chain(stream::pending());
        let (stop_reader, stop) = oneshot::channel();
        let reader = tokio::spawn(read_intents(frames, state.clone(), conn.clone(), stop));

        assert_matches!(outbound.recv().await, Some(SendMessage::DocumentUsers(_)));
        stop_reader.send(()).unwrap();
        reader.await.unwrap();
        assert!(state.rooms.is_member(10, conn.id));

        state.coordinator.disconnect(&conn).await;
        assert!(!state.rooms.is_member(10, conn.id));
        assert_eq!(store.open_session_count(10, 1), 0);
    }

    #[tokio::test]
    async fn malformed_frames_are_answered_and_the_stream_end_stops_the_reader() {
        let (_store, state) = state();
        let (conn, mut outbound) = ConnectionHandle::new(1);
        let frames = stream::iter(vec![Ok(Message::Text("not json".to_string()))]);
        let (_stop_reader, stop) = oneshot::channel();

        read_intents(frames, state, conn, stop).await;

        assert_matches!(outbound.try_recv(), Ok(SendMessage::Error(_)));
    }
}
