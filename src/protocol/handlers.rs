use crate::viewport::{Viewport, ViewportEntry, ViewportFilter};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Context handed to a domain event handler.
pub struct HandlerInput<'a> {
    pub conn_id: &'a str,
    pub topic: &'a str,
    pub join_ref: Option<&'a str>,
    pub payload: &'a Value,
}

/// Ok(response) becomes a phx_reply ok; Err(reason) a phx_reply error.
pub type HandlerResult = Result<Value, String>;

pub type EventHandler = Box<dyn Fn(HandlerInput) -> HandlerResult + Send + Sync>;

/// Topic pattern for handler registration: exact name, or a prefix ending
/// in '*' ("entities:*").
#[derive(Clone, Debug, PartialEq)]
pub enum TopicPattern {
    Exact(String),
    Prefix(String),
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => TopicPattern::Prefix(prefix.to_string()),
            None => TopicPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::Exact(name) => topic == name,
            TopicPattern::Prefix(prefix) => topic.starts_with(prefix.as_str()),
        }
    }
}

/// Load-time table mapping (topic pattern, event) to a handler capability.
///
/// Resolved once at startup; first matching entry wins. Events with no
/// handler are acknowledged and otherwise ignored by the session.
pub struct HandlerTable {
    entries: Vec<(TopicPattern, String, EventHandler)>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, pattern: &str, event: &str, handler: EventHandler) {
        self.entries
            .push((TopicPattern::parse(pattern), event.to_string(), handler));
    }

    pub fn resolve(&self, topic: &str, event: &str) -> Option<&EventHandler> {
        self.entries
            .iter()
            .find(|(pattern, entry_event, _)| entry_event == event && pattern.matches(topic))
            .map(|(_, _, handler)| handler)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard handler for the "viewport" event: replaces the connection's
/// viewport wholesale.
pub fn viewport_handler(filter: Arc<ViewportFilter>) -> EventHandler {
    Box::new(move |input: HandlerInput| {
        let viewport: Viewport = serde_json::from_value(input.payload.clone())
            .map_err(|_| "invalid_viewport".to_string())?;
        viewport.validate().map_err(|_| "invalid_viewport".to_string())?;

        debug!(
            conn_id = %input.conn_id,
            topic = %input.topic,
            "Viewport updated"
        );
        filter.set(
            input.conn_id,
            ViewportEntry {
                topic: input.topic.to_string(),
                join_ref: input.join_ref.map(|r| r.to_string()),
                viewport,
            },
        );
        Ok(json!({}))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matching() {
        assert!(TopicPattern::parse("entities").matches("entities"));
        assert!(!TopicPattern::parse("entities").matches("entities:map"));
        assert!(TopicPattern::parse("entities:*").matches("entities:map"));
        assert!(TopicPattern::parse("*").matches("anything"));
    }

    #[test]
    fn resolve_finds_first_matching_entry() {
        let mut table = HandlerTable::new();
        table.register("entities", "viewport", Box::new(|_| Ok(json!({"n": 1}))));
        table.register("*", "viewport", Box::new(|_| Ok(json!({"n": 2}))));

        let handler = table.resolve("entities", "viewport").unwrap();
        let result = handler(HandlerInput {
            conn_id: "c1",
            topic: "entities",
            join_ref: None,
            payload: &json!({}),
        })
        .unwrap();
        assert_eq!(result["n"], 1);

        // Other topics fall through to the wildcard
        assert!(table.resolve("weather", "viewport").is_some());
        assert!(table.resolve("entities", "unknown").is_none());
    }

    #[test]
    fn viewport_handler_sets_filter() {
        let filter = Arc::new(ViewportFilter::new());
        let handler = viewport_handler(filter.clone());

        let result = handler(HandlerInput {
            conn_id: "c1",
            topic: "entities",
            join_ref: Some("1"),
            payload: &json!({"south": 0.0, "west": 0.0, "north": 20.0, "east": 20.0}),
        });
        assert!(result.is_ok());

        let entry = filter.get("c1").unwrap();
        assert_eq!(entry.topic, "entities");
        assert_eq!(entry.join_ref.as_deref(), Some("1"));
        assert!(entry.viewport.contains(10.0, 10.0));
    }

    #[test]
    fn viewport_handler_rejects_bad_payloads() {
        let filter = Arc::new(ViewportFilter::new());
        let handler = viewport_handler(filter.clone());

        let result = handler(HandlerInput {
            conn_id: "c1",
            topic: "entities",
            join_ref: None,
            payload: &json!({"south": 50.0, "west": 0.0, "north": 20.0, "east": 20.0}),
        });
        assert_eq!(result, Err("invalid_viewport".to_string()));
        assert!(filter.get("c1").is_none());
    }
}
