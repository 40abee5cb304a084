use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

mod store;

pub use store::EntityStore;

/// Geographic position of a tracked entity
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

/// A trackable moving object (aircraft, ship, ...) in the live world state.
///
/// Entities are ephemeral: created on first observed update, refreshed on
/// each subsequent update, and removed after the configured silence window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identity key (e.g. a 24-bit ICAO address in hex)
    pub id: String,

    /// Last reported position
    pub position: Position,

    /// Free-form attributes (callsign, speed, heading, kind, ...)
    pub attributes: HashMap<String, Value>,

    /// When the last update for this entity was observed
    pub last_seen: DateTime<Utc>,
}

impl Entity {
    /// The entity's kind attribute, if the upstream source reported one.
    pub fn kind(&self) -> Option<&str> {
        self.attributes.get("kind").and_then(|v| v.as_str())
    }
}

/// Raw entity update as published on the backbone's entity-update subjects.
///
/// Shape: identity + position + attributes. Attributes are merged into the
/// existing entity; the position is replaced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}
