mod frame;
pub mod engine;
pub mod handlers;


pub use engine::{Session, SessionContext};
pub use frame::{Frame, ReplyStatus};
pub use handlers::{HandlerInput, HandlerTable};

/// Reserved protocol events
pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PRESENCE_STATE: &str = "presence_state";
pub const PRESENCE_DIFF: &str = "presence_diff";

/// Transport-level heartbeat event, answered without a join
pub const HEARTBEAT: &str = "heartbeat";
/// Reserved topic carrying heartbeats and frame-level error replies
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Server -> client push event carrying the periodic viewport snapshot
pub const SNAPSHOT: &str = "snapshot";
/// Marker push emitted when a slow consumer's queue dropped frames
pub const SLOW_CONSUMER: &str = "slow_consumer";

/// Protocol errors recovered locally: answered with an error reply, the
/// connection stays open.
#[derive(Debug, PartialEq)]
pub enum ProtocolError {
    /// Frame was not a valid [join_ref, ref, topic, event, payload] array
    MalformedFrame(String),
    /// Non-join event received for a topic not in Joined state
    NotJoined(String),
}

impl ProtocolError {
    /// Stable reason string used in error reply payloads
    pub fn reason(&self) -> &'static str {
        match self {
            ProtocolError::MalformedFrame(_) => "malformed_frame",
            ProtocolError::NotJoined(_) => "not_joined",
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::MalformedFrame(detail) => write!(f, "malformed frame: {}", detail),
            ProtocolError::NotJoined(topic) => write!(f, "topic '{}' not joined", topic),
        }
    }
}

impl std::error::Error for ProtocolError {}
