use crate::auth::parse_bearer_token;
use crate::protocol::Frame;
use crate::registry::ConnectionRegistry;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// State for the admin API.
#[derive(Clone)]
pub struct AdminAppState {
    pub registry: Arc<ConnectionRegistry>,
    /// Required bearer token for POST /api/admin/publish. None = endpoint open.
    pub admin_token: Option<String>,
}

/// Request body: a message addressed to a topic/event pair, relayed verbatim
/// into the channel protocol as a push.
#[derive(Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Serialize)]
struct PublishResponse {
    delivered: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn create_admin_router(state: AdminAppState) -> Router {
    Router::new()
        .route("/api/admin/publish", post(publish))
        .with_state(Arc::new(state))
}

/// POST /api/admin/publish — push an event to every member of a topic.
async fn publish(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Response {
    if !validate_admin_token(&headers, &state.admin_token) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Unauthorized".to_string(),
            }),
        )
            .into_response();
    }

    let frame = Frame::push(&request.topic, &request.event, None, request.payload);
    let delivered = state.registry.broadcast(&request.topic, frame);

    info!(
        topic = %request.topic,
        event = %request.event,
        delivered = delivered,
        "Admin publish"
    );
    Json(PublishResponse { delivered }).into_response()
}

/// Returns true if the bearer token in `Authorization` matches the expected
/// admin token. Returns true (no restriction) when `expected` is None.
fn validate_admin_token(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        return true;
    };

    let Some(auth_header) = headers.get("Authorization") else {
        return false;
    };
    let Ok(value) = auth_header.to_str() else {
        return false;
    };
    match parse_bearer_token(value) {
        Ok(token) => token == *expected_token,
        Err(_) => false,
    }
}
