//! Typing indicator aggregation.
//!
//! The server keeps no timeout: clients send `typing: false` after their own
//! idle window and the aggregator trusts them.

use chatflow_protocol::ConnectionId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

#[derive(Debug, Clone)]
struct Typist {
    display_name: String,
    seq: u64,
}

/// Set of connections currently composing a message.
#[derive(Debug, Default)]
pub struct TypingAggregator {
    typists: DashMap<ConnectionId, Typist>,
    next_seq: AtomicU64,
}

impl TypingAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, refresh or remove the entry for `connection_id`.
    ///
    /// Returns `true` if membership changed.
    pub fn set_typing(
        &self,
        connection_id: &ConnectionId,
        display_name: &str,
        is_typing: bool,
    ) -> bool {
        if !is_typing {
            return self.remove(connection_id);
        }

        let mut inserted = false;
        self.typists
            .entry(connection_id.clone())
            .and_modify(|t| {
                if t.display_name != display_name {
                    t.display_name = display_name.to_string();
                }
            })
            .or_insert_with(|| {
                inserted = true;
                Typist {
                    display_name: display_name.to_string(),
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                }
            });

        trace!(connection = %connection_id, inserted, "Typing started");
        inserted
    }

    /// Drop the entry for `connection_id`.
    ///
    /// Returns `true` if it was present.
    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.typists.remove(connection_id).is_some();
        if removed {
            trace!(connection = %connection_id, "Typing stopped");
        }
        removed
    }

    /// Check if a connection is composing.
    #[must_use]
    pub fn is_typing(&self, connection_id: &ConnectionId) -> bool {
        self.typists.contains_key(connection_id)
    }

    /// Display names of everyone composing, in the order they started.
    ///
    /// `excluding` drops every entry with that display name, so a client
    /// never sees itself listed.
    #[must_use]
    pub fn current_typists(&self, excluding: Option<&str>) -> Vec<String> {
        let mut typists: Vec<(u64, String)> = self
            .typists
            .iter()
            .filter(|t| Some(t.display_name.as_str()) != excluding)
            .map(|t| (t.seq, t.display_name.clone()))
            .collect();
        typists.sort_by_key(|(seq, _)| *seq);
        typists.into_iter().map(|(_, name)| name).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.typists.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.typists.is_empty()
    }

    pub fn clear(&self) {
        self.typists.clear();
    }
}
