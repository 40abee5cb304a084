use crate::entity::Entity;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;


/// Client-specified geographic bounding box with optional entity-kind filters.
///
/// Replaced wholesale whenever the client sends an updated viewport; never
/// partially merged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
    /// When present, only entities whose `kind` attribute is in this set match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<HashSet<String>>,
}

/// Viewport validation errors
#[derive(Debug, PartialEq)]
pub enum ViewportError {
    /// south > north
    InvertedLatitude,
    /// Latitude outside [-90, 90] or longitude outside [-180, 180]
    OutOfRange,
}

impl std::fmt::Display for ViewportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewportError::InvertedLatitude => write!(f, "south must not exceed north"),
            ViewportError::OutOfRange => write!(f, "coordinates out of range"),
        }
    }
}

impl std::error::Error for ViewportError {}

impl Viewport {
    /// Validate coordinate ranges. west > east is legal: it denotes a box
    /// wrapped across the antimeridian.
    pub fn validate(&self) -> Result<(), ViewportError> {
        if self.south > self.north {
            return Err(ViewportError::InvertedLatitude);
        }
        let lat_ok = self.south >= -90.0 && self.north <= 90.0;
        let lon_ok = self.west >= -180.0
            && self.west <= 180.0
            && self.east >= -180.0
            && self.east <= 180.0;
        if !lat_ok || !lon_ok {
            return Err(ViewportError::OutOfRange);
        }
        Ok(())
    }

    /// Inclusion test: south <= lat <= north and lon inside the (possibly
    /// antimeridian-wrapped) west..east range.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        if latitude < self.south || latitude > self.north {
            return false;
        }
        if self.west <= self.east {
            longitude >= self.west && longitude <= self.east
        } else {
            // Wrapped range, e.g. west=170 east=-170 covers 170..180 and -180..-170
            longitude >= self.west || longitude <= self.east
        }
    }

    /// Full entity match: position inside bounds and kind filter satisfied.
    /// Entities without a `kind` attribute pass any kind filter.
    pub fn matches(&self, entity: &Entity) -> bool {
        if !self.contains(entity.position.latitude, entity.position.longitude) {
            return false;
        }
        match (&self.kinds, entity.kind()) {
            (Some(kinds), Some(kind)) => kinds.contains(kind),
            _ => true,
        }
    }
}

/// A connection's active viewport, tied to the topic and join it was set on.
#[derive(Clone, Debug)]
pub struct ViewportEntry {
    pub topic: String,
    pub join_ref: Option<String>,
    pub viewport: Viewport,
}

/// Per-connection viewport state consulted by the broadcaster on each tick.
///
/// One viewport per connection; setting a new one replaces the old atomically.
pub struct ViewportFilter {
    entries: DashMap<String, ViewportEntry>,
}

impl ViewportFilter {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Replace the connection's viewport wholesale.
    pub fn set(&self, conn_id: &str, entry: ViewportEntry) {
        self.entries.insert(conn_id.to_string(), entry);
    }

    /// Get the connection's current viewport entry.
    pub fn get(&self, conn_id: &str) -> Option<ViewportEntry> {
        self.entries.get(conn_id).map(|e| e.clone())
    }

    /// Drop the connection's viewport (transport close).
    pub fn remove(&self, conn_id: &str) {
        self.entries.remove(conn_id);
    }

    /// Drop the viewport only if it was set on `topic` (phx_leave).
    pub fn remove_for_topic(&self, conn_id: &str, topic: &str) {
        self.entries.remove_if(conn_id, |_, entry| entry.topic == topic);
    }

    /// Connection ids whose current viewport contains the entity.
    pub fn evaluate(&self, entity: &Entity) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.viewport.matches(entity))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Snapshot of all (conn_id, entry) pairs for the broadcaster tick.
    pub fn all(&self) -> Vec<(String, ViewportEntry)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ViewportFilter {
    fn default() -> Self {
        Self::new()
    }
}
