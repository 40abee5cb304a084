use crate::entity::{Entity, EntityUpdate, Position};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

/// In-memory store of live entities, keyed by identity.
///
/// Mutated by the bridge ingress task, read by the broadcaster on each tick.
/// DashMap keeps updates for unrelated entities independent.
pub struct EntityStore {
    entities: DashMap<String, Entity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
        }
    }

    /// Apply an upstream update: create the entity on first sight, otherwise
    /// replace its position, merge attributes, and refresh `last_seen`.
    pub fn apply(&self, update: EntityUpdate) {
        let now = Utc::now();
        let position = Position {
            latitude: update.latitude,
            longitude: update.longitude,
            altitude: update.altitude,
        };

        let mut entity = self
            .entities
            .entry(update.id.clone())
            .or_insert_with(|| Entity {
                id: update.id.clone(),
                position,
                attributes: Default::default(),
                last_seen: now,
            });

        entity.position = position;
        entity.last_seen = now;
        for (key, value) in update.attributes {
            entity.attributes.insert(key, value);
        }
    }

    /// Remove entities silent for longer than `silence_seconds`.
    ///
    /// Returns the ids that were removed. Expired entities are implicitly
    /// absent from the next snapshot; no explicit deletion push is needed.
    pub fn expire_silent(&self, silence_seconds: u64) -> Vec<String> {
        let cutoff = Utc::now() - Duration::seconds(silence_seconds as i64);
        let expired: Vec<String> = self
            .entities
            .iter()
            .filter(|e| e.last_seen < cutoff)
            .map(|e| e.id.clone())
            .collect();

        for id in &expired {
            self.entities.remove(id);
            debug!(entity_id = %id, "Entity expired after silence window");
        }

        expired
    }

    /// Get entity by id
    pub fn get(&self, id: &str) -> Option<Entity> {
        self.entities.get(id).map(|e| e.clone())
    }

    /// Snapshot of all live entities
    pub fn all(&self) -> Vec<Entity> {
        self.entities.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Insert a fully-formed entity, bypassing the update path. Tests use this
    /// to back-date `last_seen`.
    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}
