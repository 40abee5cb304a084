use crate::protocol::{Frame, Session, SessionContext};
use crate::registry::OutboundQueue;
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
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared application state for the WebSocket handler
#[derive(Clone)]
pub struct WsAppState {
    pub session_ctx: Arc<SessionContext>,
    pub outbound_queue_capacity: usize,
    pub slow_consumer_policy: crate::registry::SlowConsumerPolicy,
}

/// GET /ws - WebSocket upgrade handler. Authorization happens per topic at
/// phx_join time, not at upgrade time.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsAppState>>) -> Response {
    debug!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Create the WebSocket router
pub fn create_ws_router(state: Arc<WsAppState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

/// Handle one WebSocket connection: a read task (this future) driving the
/// protocol session, and a write task draining the bounded outbound queue.
/// The queue decouples the halves so a slow client cannot block processing
/// for other connections.
async fn handle_socket(socket: WebSocket, state: Arc<WsAppState>) {
    let conn_id = Uuid::now_v7().to_string();
    let queue = Arc::new(OutboundQueue::new(
        state.outbound_queue_capacity,
        state.slow_consumer_policy,
    ));
    state
        .session_ctx
        .registry
        .add_connection(&conn_id, Arc::clone(&queue));

    info!(conn_id = %conn_id, "WebSocket connection established");

    let (mut sink, mut stream) = socket.split();

    // Write half: serialize and send until the queue closes
    let write_queue = Arc::clone(&queue);
    let write_conn_id = conn_id.clone();
    let write_task = tokio::spawn(async move {
        while let Some(frame) = write_queue.pop().await {
            let text = match frame.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn_id = %write_conn_id, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Read half: frames on one connection are processed in arrival order
    let mut session = Session::new(conn_id.clone(), Arc::clone(&queue), Arc::clone(&state.session_ctx));
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match Frame::decode(&text) {
                Ok(frame) => session.handle_frame(frame).await,
                Err(error) => session.reject_malformed(&error),
            },
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "WebSocket client disconnected");
                break;
            }
            Ok(_) => {
                // Binary, ping and pong frames are ignored; the transport
                // layer answers pings
            }
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Transport closed: remove every membership, emitting leave diffs
    session.shutdown();
    queue.close();
    write_task.abort();
    info!(conn_id = %conn_id, "WebSocket connection closed");
}
