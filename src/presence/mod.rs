use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;


/// Structural delta between two presence mappings for one topic.
///
/// Clients that apply the initial `presence_state` followed by every
/// subsequent diff in receipt order reconstruct the exact live presence set.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PresenceDiff {
    /// Identities that joined, with their metadata
    pub joins: HashMap<String, Value>,
    /// Identities that left, with the metadata they had
    pub leaves: HashMap<String, Value>,
}

impl PresenceDiff {
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.leaves.is_empty()
    }
}

/// One identity's presence record: its metadata plus the number of
/// connections currently joined under it.
struct PresenceRecord {
    meta: Value,
    connections: usize,
}

/// Per-topic set of joined identities and their metadata.
///
/// An identity joined through several connections keeps a single record with
/// a connection count; its leave diff is emitted only when the last of those
/// connections leaves. Diff callbacks run while the topic's entry lock is
/// held, so the order of emitted diffs equals the order the joins/leaves
/// were applied.
pub struct PresenceTracker {
    topics: DashMap<String, HashMap<String, PresenceRecord>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    /// Record a connection for `identity` on `topic` and return the join
    /// diff. `on_diff` runs under the topic lock whenever the diff is
    /// non-empty; callers emit the diff from there.
    ///
    /// Joining again with new metadata replaces the old metadata; the diff
    /// then reports a leave of the old record and a join of the new one.
    pub fn join(
        &self,
        topic: &str,
        identity: &str,
        meta: Value,
        on_diff: impl FnOnce(&PresenceDiff),
    ) -> PresenceDiff {
        let mut members = self.topics.entry(topic.to_string()).or_default();
        let mut diff = PresenceDiff::default();
        match members.get_mut(identity) {
            Some(record) => {
                record.connections += 1;
                if record.meta != meta {
                    diff.leaves.insert(identity.to_string(), record.meta.clone());
                    diff.joins.insert(identity.to_string(), meta.clone());
                    record.meta = meta;
                }
            }
            None => {
                members.insert(
                    identity.to_string(),
                    PresenceRecord {
                        meta: meta.clone(),
                        connections: 1,
                    },
                );
                diff.joins.insert(identity.to_string(), meta);
            }
        }
        if !diff.is_empty() {
            on_diff(&diff);
        }
        diff
    }

    /// Drop one connection of `identity` from `topic`. Returns the leave
    /// diff when the identity's last connection left; None while other
    /// connections keep it present, or if it was not present at all.
    /// `on_diff` runs under the topic lock, as in [`PresenceTracker::join`].
    pub fn leave(
        &self,
        topic: &str,
        identity: &str,
        on_diff: impl FnOnce(&PresenceDiff),
    ) -> Option<PresenceDiff> {
        let mut members = self.topics.get_mut(topic)?;
        let remaining = {
            let record = members.get_mut(identity)?;
            record.connections -= 1;
            record.connections
        };
        if remaining > 0 {
            return None;
        }
        let record = members.remove(identity)?;
        let mut diff = PresenceDiff::default();
        diff.leaves.insert(identity.to_string(), record.meta);
        on_diff(&diff);
        let empty = members.is_empty();
        drop(members);
        if empty {
            self.topics.remove_if(topic, |_, m| m.is_empty());
        }
        Some(diff)
    }

    /// Complete current presence mapping for `topic` (the `presence_state`
    /// payload pushed to a joiner).
    pub fn state(&self, topic: &str) -> HashMap<String, Value> {
        self.topics
            .get(topic)
            .map(|m| {
                m.iter()
                    .map(|(identity, record)| (identity.clone(), record.meta.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Structural delta between two presence mappings. Exposed for clients of
    /// the library and for replay verification in tests.
    pub fn diff(
        previous: &HashMap<String, Value>,
        current: &HashMap<String, Value>,
    ) -> PresenceDiff {
        let mut diff = PresenceDiff::default();
        for (identity, meta) in current {
            if previous.get(identity) != Some(meta) {
                diff.joins.insert(identity.clone(), meta.clone());
            }
        }
        for (identity, meta) in previous {
            if !current.contains_key(identity) || current.get(identity) != Some(meta) {
                diff.leaves.insert(identity.clone(), meta.clone());
            }
        }
        diff
    }

    /// Apply a diff to a local view, as a client would.
    pub fn apply_diff(view: &mut HashMap<String, Value>, diff: &PresenceDiff) {
        for identity in diff.leaves.keys() {
            view.remove(identity);
        }
        for (identity, meta) in &diff.joins {
            view.insert(identity.clone(), meta.clone());
        }
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
