use crate::protocol::{Frame, SLOW_CONSUMER};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, warn};


/// What to do when a connection's bounded outbound queue overflows.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SlowConsumerPolicy {
    /// Evict the oldest frame and enqueue a slow_consumer marker push.
    /// Snapshots are superseding, so dropping old ones is safe.
    #[default]
    DropOldest,
    /// Close the queue; the write task exits and the transport closes.
    Disconnect,
}

/// Result of pushing onto an outbound queue.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; the oldest frame was evicted to make room
    DroppedOldest,
    /// Queue is closed (disconnect policy tripped, or the connection is gone)
    Closed,
}

struct QueueInner {
    frames: VecDeque<Frame>,
    closed: bool,
    /// A slow_consumer marker is already pending for the current overflow
    /// episode; reset when the queue drains empty.
    marker_pending: bool,
}

/// Bounded per-connection outbound queue decoupling the protocol engine and
/// broadcaster from the socket write task.
///
/// A VecDeque under a mutex rather than an mpsc channel: the drop-oldest
/// policy must evict from the front, which channels cannot do.
pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    policy: SlowConsumerPolicy,
}

impl OutboundQueue {
    pub fn new(capacity: usize, policy: SlowConsumerPolicy) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
                marker_pending: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    /// Enqueue a frame for the write task. Never blocks; on overflow the
    /// configured policy decides between evicting the oldest frame and
    /// closing the queue.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let outcome = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(_) => return PushOutcome::Closed,
            };
            if inner.closed {
                return PushOutcome::Closed;
            }

            if inner.frames.len() >= self.capacity {
                match self.policy {
                    SlowConsumerPolicy::DropOldest => {
                        let dropped = inner.frames.pop_front();
                        if !inner.marker_pending {
                            inner.marker_pending = true;
                            let topic = dropped
                                .as_ref()
                                .map(|f| f.topic.as_str())
                                .unwrap_or(&frame.topic);
                            inner.frames.push_back(Frame::push(
                                topic,
                                SLOW_CONSUMER,
                                None,
                                json!({}),
                            ));
                        }
                        inner.frames.push_back(frame);
                        PushOutcome::DroppedOldest
                    }
                    SlowConsumerPolicy::Disconnect => {
                        inner.closed = true;
                        inner.frames.clear();
                        PushOutcome::Closed
                    }
                }
            } else {
                inner.frames.push_back(frame);
                PushOutcome::Queued
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Await the next frame. Returns None once the queue is closed and
    /// drained.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            {
                let mut inner = self.inner.lock().ok()?;
                if let Some(frame) = inner.frames.pop_front() {
                    if inner.frames.is_empty() {
                        inner.marker_pending = false;
                    }
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue; pending frames are discarded and pop() returns None.
    pub fn close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.closed = true;
            inner.frames.clear();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|i| i.closed).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.frames.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Topic activation transitions, consumed by the bridge's relay manager to
/// drive eager subscribe/unsubscribe on the backbone.
#[derive(Clone, Debug, PartialEq)]
pub enum TopicEvent {
    /// Topic gained its first member
    Activated(String),
    /// Topic lost its last member
    Deactivated(String),
}

/// Authoritative topic-membership index and frame router.
///
/// topic -> member set and connection -> topic set are DashMaps, so
/// registration and broadcast for unrelated topics make independent progress.
/// A broadcast snapshots the member set under the topic's shard lock, then
/// delivers to each member's queue independently. TopicEvents are sent while
/// the topic's entry guard is still held, so the Activated/Deactivated stream
/// matches the order the transitions were applied.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<OutboundQueue>>,
    topic_members: DashMap<String, HashSet<String>>,
    conn_topics: DashMap<String, HashSet<String>>,
    topic_events_tx: UnboundedSender<TopicEvent>,
}

impl ConnectionRegistry {
    /// Create the registry plus the receiver for topic activation events.
    pub fn new() -> (Self, UnboundedReceiver<TopicEvent>) {
        let (topic_events_tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                connections: DashMap::new(),
                topic_members: DashMap::new(),
                conn_topics: DashMap::new(),
                topic_events_tx,
            },
            rx,
        )
    }

    /// Track a live connection and its outbound queue.
    pub fn add_connection(&self, conn_id: &str, queue: Arc<OutboundQueue>) {
        self.connections.insert(conn_id.to_string(), queue);
        self.conn_topics
            .insert(conn_id.to_string(), HashSet::new());
    }

    /// Register `conn_id` as a member of `topic`. Returns true if this was
    /// the topic's first member.
    pub fn register(&self, conn_id: &str, topic: &str) -> bool {
        let mut members = self.topic_members.entry(topic.to_string()).or_default();
        let first = members.is_empty();
        members.insert(conn_id.to_string());
        if first {
            // Sent under the entry guard: a concurrent unregister on the same
            // topic cannot interleave its event between ours
            debug!(topic = %topic, "Topic activated");
            let _ = self
                .topic_events_tx
                .send(TopicEvent::Activated(topic.to_string()));
        }
        drop(members);

        self.conn_topics
            .entry(conn_id.to_string())
            .or_default()
            .insert(topic.to_string());

        first
    }

    /// Remove `conn_id` from `topic`. Returns true if the topic lost its
    /// last member.
    pub fn unregister(&self, conn_id: &str, topic: &str) -> bool {
        let mut last = false;
        if let Some(mut members) = self.topic_members.get_mut(topic) {
            members.remove(conn_id);
            last = members.is_empty();
            if last {
                debug!(topic = %topic, "Topic deactivated");
                let _ = self
                    .topic_events_tx
                    .send(TopicEvent::Deactivated(topic.to_string()));
            }
        }
        if last {
            self.topic_members.remove_if(topic, |_, m| m.is_empty());
        }
        if let Some(mut topics) = self.conn_topics.get_mut(conn_id) {
            topics.remove(topic);
        }
        last
    }

    /// Current members of `topic` (snapshot).
    pub fn members(&self, topic: &str) -> Vec<String> {
        self.topic_members
            .get(topic)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Topics that currently have at least one member. The bridge derives
    /// its desired backbone subscription set from this.
    pub fn active_topics(&self) -> HashSet<String> {
        self.topic_members
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Deliver a frame to one connection's outbound queue, best-effort.
    pub fn send_to(&self, conn_id: &str, frame: Frame) -> PushOutcome {
        match self.connections.get(conn_id) {
            Some(queue) => {
                let outcome = queue.push(frame);
                if outcome == PushOutcome::DroppedOldest {
                    warn!(conn_id = %conn_id, "Slow consumer: dropped oldest outbound frame");
                }
                outcome
            }
            None => PushOutcome::Closed,
        }
    }

    /// Deliver a frame to every current member of `topic`, best-effort and
    /// independent per member. Returns the number of queues reached.
    pub fn broadcast(&self, topic: &str, frame: Frame) -> usize {
        self.broadcast_except(topic, None, frame)
    }

    /// Broadcast to every member of `topic` except `except` (the frame's
    /// originator, e.g. a presence joiner).
    pub fn broadcast_except(&self, topic: &str, except: Option<&str>, frame: Frame) -> usize {
        let members = self.members(topic);
        let mut delivered = 0;
        for conn_id in members {
            if Some(conn_id.as_str()) == except {
                continue;
            }
            if self.send_to(&conn_id, frame.clone()) != PushOutcome::Closed {
                delivered += 1;
            }
        }
        delivered
    }

    /// Forget a connection entirely (transport close). Returns the topics it
    /// was a member of, so the caller can emit leave diffs.
    pub fn remove_connection(&self, conn_id: &str) -> Vec<String> {
        let topics: Vec<String> = self
            .conn_topics
            .remove(conn_id)
            .map(|(_, topics)| topics.into_iter().collect())
            .unwrap_or_default();

        for topic in &topics {
            self.unregister(conn_id, topic);
        }
        if let Some((_, queue)) = self.connections.remove(conn_id) {
            queue.close();
        }
        topics
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
