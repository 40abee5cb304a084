use crate::auth::{self, AuthOutcome, JoinAuthorizer};
use crate::presence::{PresenceDiff, PresenceTracker};
use crate::protocol::handlers::{HandlerInput, HandlerTable};
use crate::protocol::{
    Frame, ProtocolError, ReplyStatus, HEARTBEAT, PHOENIX_TOPIC, PHX_JOIN, PHX_LEAVE,
    PRESENCE_DIFF, PRESENCE_STATE,
};
use crate::registry::{ConnectionRegistry, OutboundQueue};
use crate::viewport::ViewportFilter;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Join state of a (connection, topic) membership.
///
/// Joining -> Joined -> Left, or Joining -> JoinError. Both terminal states
/// allow rejoin via a fresh phx_join.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JoinState {
    Joining,
    Joined,
    JoinError,
    Left,
}

#[derive(Clone, Debug)]
struct TopicMembership {
    state: JoinState,
    join_ref: Option<String>,
    identity: Option<String>,
}

/// Shared collaborators every session works against, constructed once at
/// startup and handed to each connection.
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub viewports: Arc<ViewportFilter>,
    pub handlers: Arc<HandlerTable>,
    pub authorizer: Arc<dyn JoinAuthorizer>,
    pub auth_enabled: bool,
    pub join_timeout: Duration,
}

/// Per-connection protocol state machine.
///
/// Processes one inbound frame at a time; frames on one connection are
/// serialized by the read loop, different connections run independently.
/// All side effects are local to this connection except presence diffs and
/// domain broadcasts, which fan out to other members of the same topic.
pub struct Session {
    conn_id: String,
    queue: Arc<OutboundQueue>,
    topics: HashMap<String, TopicMembership>,
    ctx: Arc<SessionContext>,
}

impl Session {
    pub fn new(conn_id: String, queue: Arc<OutboundQueue>, ctx: Arc<SessionContext>) -> Self {
        Self {
            conn_id,
            queue,
            topics: HashMap::new(),
            ctx,
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Current join state for a topic, if any frame ever touched it.
    pub fn join_state(&self, topic: &str) -> Option<JoinState> {
        self.topics.get(topic).map(|m| m.state)
    }

    /// Process one inbound frame, emitting replies and fan-out pushes.
    pub async fn handle_frame(&mut self, frame: Frame) {
        if frame.topic == PHOENIX_TOPIC && frame.event == HEARTBEAT {
            self.send(frame.reply(ReplyStatus::Ok, json!({})));
            return;
        }

        match frame.event.as_str() {
            PHX_JOIN => self.handle_join(frame).await,
            PHX_LEAVE => self.handle_leave(frame),
            _ => self.handle_event(frame),
        }
    }

    /// Answer a frame that could not be decoded. No topic or ref is
    /// recoverable, so the error reply rides the reserved phoenix topic.
    pub fn reject_malformed(&self, error: &ProtocolError) {
        warn!(conn_id = %self.conn_id, error = %error, "Malformed frame");
        self.send(Frame::push(
            PHOENIX_TOPIC,
            crate::protocol::PHX_REPLY,
            None,
            json!({
                "status": ReplyStatus::Error.as_str(),
                "response": {"reason": error.reason()},
            }),
        ));
    }

    async fn handle_join(&mut self, frame: Frame) {
        let topic = frame.topic.clone();

        // A fresh join supersedes any existing membership on the topic
        if self.join_state(&topic) == Some(JoinState::Joined) {
            debug!(conn_id = %self.conn_id, topic = %topic, "Rejoin supersedes existing join");
            self.leave_topic(&topic);
        }

        self.topics.insert(
            topic.clone(),
            TopicMembership {
                state: JoinState::Joining,
                join_ref: frame.join_ref.clone(),
                identity: None,
            },
        );

        let identity = if self.ctx.auth_enabled {
            let credential = auth::extract_token(&frame.payload).ok();
            let authorize = self.ctx.authorizer.authorize(credential.as_deref());
            match tokio::time::timeout(self.ctx.join_timeout, authorize).await {
                Err(_) => {
                    // Join abandoned: no residual membership state
                    warn!(conn_id = %self.conn_id, topic = %topic, "Join authorization timed out");
                    self.topics.remove(&topic);
                    self.send(frame.reply(ReplyStatus::Timeout, json!({})));
                    return;
                }
                Ok(AuthOutcome::Denied { reason }) => {
                    if let Some(membership) = self.topics.get_mut(&topic) {
                        membership.state = JoinState::JoinError;
                    }
                    info!(conn_id = %self.conn_id, topic = %topic, reason = %reason, "Join denied");
                    self.send(frame.reply(ReplyStatus::Error, json!({"reason": reason})));
                    return;
                }
                Ok(AuthOutcome::Granted { identity }) => identity,
            }
        } else {
            self.conn_id.clone()
        };

        if let Some(membership) = self.topics.get_mut(&topic) {
            membership.state = JoinState::Joined;
            membership.identity = Some(identity.clone());
        }
        self.ctx.registry.register(&self.conn_id, &topic);

        info!(conn_id = %self.conn_id, topic = %topic, identity = %identity, "Joined topic");

        // Reply first, then presence: the joiner's baseline is the full
        // state (which already includes it), so it is excluded from its own
        // join diff and replaying state + later diffs stays exact.
        self.send(frame.reply(ReplyStatus::Ok, json!({})));

        let meta = json!({"online_at": Utc::now().timestamp_millis()});
        self.ctx
            .presence
            .join(&topic, &identity, meta, |diff| self.broadcast_diff(&topic, diff));

        let state = self.ctx.presence.state(&topic);
        self.send(Frame::push(
            &topic,
            PRESENCE_STATE,
            frame.join_ref.clone(),
            json!(state),
        ));
    }

    fn handle_leave(&mut self, frame: Frame) {
        if self.join_state(&frame.topic) != Some(JoinState::Joined) {
            self.send(frame.reply(
                ReplyStatus::Error,
                json!({"reason": ProtocolError::NotJoined(frame.topic.clone()).reason()}),
            ));
            return;
        }

        self.leave_topic(&frame.topic);
        if let Some(membership) = self.topics.get_mut(&frame.topic) {
            membership.state = JoinState::Left;
        }
        info!(conn_id = %self.conn_id, topic = %frame.topic, "Left topic");
        self.send(frame.reply(ReplyStatus::Ok, json!({})));
    }

    fn handle_event(&mut self, frame: Frame) {
        let membership = match self.topics.get(&frame.topic) {
            Some(m) if m.state == JoinState::Joined => m,
            _ => {
                // Protocol error, recovered locally: the connection stays open
                debug!(
                    conn_id = %self.conn_id,
                    topic = %frame.topic,
                    event = %frame.event,
                    "Event for non-joined topic"
                );
                self.send(frame.reply(
                    ReplyStatus::Error,
                    json!({"reason": ProtocolError::NotJoined(frame.topic.clone()).reason()}),
                ));
                return;
            }
        };

        match self.ctx.handlers.resolve(&frame.topic, &frame.event) {
            Some(handler) => {
                let input = HandlerInput {
                    conn_id: &self.conn_id,
                    topic: &frame.topic,
                    join_ref: membership.join_ref.as_deref(),
                    payload: &frame.payload,
                };
                match handler(input) {
                    Ok(response) => self.send(frame.reply(ReplyStatus::Ok, response)),
                    Err(reason) => {
                        self.send(frame.reply(ReplyStatus::Error, json!({"reason": reason})))
                    }
                }
            }
            None => {
                // Unknown events are acknowledged but otherwise ignored
                self.send(frame.reply(ReplyStatus::Ok, json!({})));
            }
        }
    }

    /// Tear down every membership on transport close, emitting leave diffs
    /// to remaining members. The registry forgets the connection first so no
    /// broadcast can race a torn membership set.
    pub fn shutdown(&mut self) {
        let topics = self.ctx.registry.remove_connection(&self.conn_id);
        for topic in topics {
            if let Some(membership) = self.topics.get(&topic) {
                if membership.state != JoinState::Joined {
                    continue;
                }
                if let Some(identity) = membership.identity.clone() {
                    self.ctx
                        .presence
                        .leave(&topic, &identity, |diff| self.broadcast_diff(&topic, diff));
                }
            }
        }
        self.ctx.viewports.remove(&self.conn_id);
        self.topics.clear();
        info!(conn_id = %self.conn_id, "Session closed");
    }

    /// Shared leave side effects for phx_leave, rejoin supersession, and
    /// shutdown-by-topic.
    fn leave_topic(&mut self, topic: &str) {
        let identity = self
            .topics
            .get(topic)
            .and_then(|m| m.identity.clone());

        self.ctx.registry.unregister(&self.conn_id, topic);
        self.ctx.viewports.remove_for_topic(&self.conn_id, topic);
        if let Some(identity) = identity {
            self.ctx
                .presence
                .leave(topic, &identity, |diff| self.broadcast_diff(topic, diff));
        }
    }

    /// Enqueue a presence diff to every other member. Runs under the presence
    /// tracker's topic lock so delivery order equals application order.
    fn broadcast_diff(&self, topic: &str, diff: &PresenceDiff) {
        if diff.is_empty() {
            return;
        }
        // Broadcast pushes carry join_ref = null: per-member join refs
        // differ, so a shared frame cannot carry one
        let frame = Frame::push(topic, PRESENCE_DIFF, None, json!(diff));
        self.ctx
            .registry
            .broadcast_except(topic, Some(&self.conn_id), frame);
    }

    fn send(&self, frame: Frame) {
        self.queue.push(frame);
    }
}
