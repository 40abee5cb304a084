// WebSocket and admin surfaces

pub mod admin;
pub mod websocket;

pub use admin::{create_admin_router, AdminAppState};
pub use websocket::{create_ws_router, ws_handler, WsAppState};
