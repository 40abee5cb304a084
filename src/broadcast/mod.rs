use crate::entity::EntityStore;
use crate::protocol::{Frame, SNAPSHOT};
use crate::registry::ConnectionRegistry;
use crate::viewport::ViewportFilter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Periodic snapshot broadcaster.
///
/// Ticks at the configured cadence independent of any connection's
/// lifecycle. Each tick expires silent entities, then pushes to every
/// connection with a viewport the full set of entities currently inside it
/// (a superseding snapshot, not a diff — client drift is bounded to one
/// tick and no per-client per-entity bookkeeping is needed).
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    viewports: Arc<ViewportFilter>,
    entities: Arc<EntityStore>,
    interval: Duration,
    entity_expiry_seconds: u64,
}

impl Broadcaster {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        viewports: Arc<ViewportFilter>,
        entities: Arc<EntityStore>,
        interval: Duration,
        entity_expiry_seconds: u64,
    ) -> Self {
        Self {
            registry,
            viewports,
            entities,
            interval,
            entity_expiry_seconds,
        }
    }

    /// Run forever at the configured cadence.
    pub async fn run(self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Broadcaster started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    /// One broadcast pass. Public so tests can drive ticks directly.
    pub fn tick(&self) {
        let expired = self.entities.expire_silent(self.entity_expiry_seconds);
        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired silent entities");
        }

        let entities = self.entities.all();
        for (conn_id, entry) in self.viewports.all() {
            let visible: Vec<_> = entities
                .iter()
                .filter(|e| entry.viewport.matches(e))
                .collect();

            // Snapshot consistency: every entity included satisfies the
            // client's viewport at this instant
            let frame = Frame::push(
                &entry.topic,
                SNAPSHOT,
                entry.join_ref.clone(),
                json!({ "entities": visible }),
            );
            self.registry.send_to(&conn_id, frame);
        }
    }
}
