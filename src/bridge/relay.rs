use crate::protocol::Frame;
use crate::registry::{ConnectionRegistry, TopicEvent};
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Relays application pushes from the backbone into the channel protocol.
///
/// For every topic with at least one member there is exactly one backbone
/// subscription to "{prefix}.{topic}.>"; messages on it become pushed frames
/// to all current members. Subscriptions follow the registry's activation
/// events eagerly, and on every backbone reconnect the set is reconciled
/// against the registry so no duplicates or zero-member subscriptions
/// accumulate.
pub struct RelayManager {
    client: async_nats::Client,
    registry: Arc<ConnectionRegistry>,
    prefix: String,
    subscriptions: HashMap<String, JoinHandle<()>>,
}

impl RelayManager {
    pub fn new(
        client: async_nats::Client,
        registry: Arc<ConnectionRegistry>,
        prefix: String,
    ) -> Self {
        Self {
            client,
            registry,
            prefix,
            subscriptions: HashMap::new(),
        }
    }

    /// Drive the relay until both event channels close.
    pub async fn run(
        mut self,
        mut topic_events: UnboundedReceiver<TopicEvent>,
        mut client_events: UnboundedReceiver<async_nats::Event>,
    ) {
        loop {
            tokio::select! {
                event = topic_events.recv() => match event {
                    Some(TopicEvent::Activated(topic)) => self.subscribe_topic(topic).await,
                    Some(TopicEvent::Deactivated(topic)) => self.unsubscribe_topic(&topic),
                    None => break,
                },
                event = client_events.recv() => match event {
                    Some(async_nats::Event::Connected) => {
                        info!("Backbone reconnected, reconciling relay subscriptions");
                        self.resync().await;
                    }
                    Some(event) => {
                        debug!(event = %event, "Backbone connection event");
                    }
                    None => break,
                },
            }
        }
        warn!("Relay manager stopped");
    }

    /// Topics currently subscribed on the backbone.
    pub fn subscribed_topics(&self) -> HashSet<String> {
        self.subscriptions.keys().cloned().collect()
    }

    /// Reconcile subscriptions against the registry's member-bearing topics.
    async fn resync(&mut self) {
        let current = self.subscribed_topics();
        let desired = self.registry.active_topics();
        let (to_add, to_remove) = subscription_plan(&current, &desired);

        for topic in to_remove {
            self.unsubscribe_topic(&topic);
        }
        for topic in to_add {
            self.subscribe_topic(topic).await;
        }
    }

    async fn subscribe_topic(&mut self, topic: String) {
        if self.subscriptions.contains_key(&topic) {
            return;
        }
        let subject = format!("{}.{}.>", self.prefix, topic);
        let subscriber = match self.client.subscribe(subject.clone()).await {
            Ok(subscriber) => subscriber,
            Err(e) => {
                warn!(subject = %subject, error = %e, "Relay subscribe failed");
                return;
            }
        };
        info!(subject = %subject, "Relay subscribed");

        let registry = Arc::clone(&self.registry);
        let prefix = self.prefix.clone();
        let relay_topic = topic.clone();
        let handle = tokio::spawn(async move {
            let mut subscriber = subscriber;
            while let Some(message) = subscriber.next().await {
                relay_message(&registry, &prefix, &relay_topic, &message.subject, &message.payload);
            }
        });
        self.subscriptions.insert(topic, handle);
    }

    fn unsubscribe_topic(&mut self, topic: &str) {
        if let Some(handle) = self.subscriptions.remove(topic) {
            // Aborting drops the subscriber, which unsubscribes on the wire
            handle.abort();
            info!(topic = %topic, "Relay unsubscribed");
        }
    }
}

/// Turn one relayed backbone message into a channel push to all members.
fn relay_message(
    registry: &ConnectionRegistry,
    prefix: &str,
    topic: &str,
    subject: &str,
    payload: &[u8],
) {
    let Some(event) = relay_event(subject, prefix, topic) else {
        warn!(subject = %subject, "Relay message with unparseable subject");
        return;
    };
    let payload: Value = serde_json::from_slice(payload).unwrap_or(Value::Null);
    let delivered = registry.broadcast(topic, Frame::push(topic, event, None, payload));
    debug!(topic = %topic, event = %event, delivered = delivered, "Relayed push");
}

/// Extract the event name from a relay subject: "{prefix}.{topic}.{event}".
fn relay_event<'a>(subject: &'a str, prefix: &str, topic: &str) -> Option<&'a str> {
    let rest = subject.strip_prefix(prefix)?.strip_prefix('.')?;
    let event = rest.strip_prefix(topic)?.strip_prefix('.')?;
    if event.is_empty() {
        None
    } else {
        Some(event)
    }
}

/// Pure reconciliation step: which topics to subscribe and which to drop so
/// `current` becomes `desired`. Sorted for deterministic application.
pub fn subscription_plan(
    current: &HashSet<String>,
    desired: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let mut to_add: Vec<String> = desired.difference(current).cloned().collect();
    let mut to_remove: Vec<String> = current.difference(desired).cloned().collect();
    to_add.sort();
    to_remove.sort();
    (to_add, to_remove)
}
