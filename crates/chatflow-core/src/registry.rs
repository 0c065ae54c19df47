//! Registry of identified connections.
//!
//! The registry is the single source of truth for who is online. Snapshots
//! are returned in join order so every client renders the same list.

use chatflow_protocol::{ConnectionId, UserInfo};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Default maximum display name length, in characters.
pub const DEFAULT_MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Validate and normalize a display name.
///
/// Returns the trimmed name.
///
/// # Errors
///
/// Returns an error message if the name is empty, too long, or contains
/// control characters.
pub fn validate_display_name(name: &str, max_len: usize) -> Result<&str, &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Display name cannot be empty");
    }
    if name.chars().count() > max_len {
        return Err("Display name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Display name contains control characters");
    }
    Ok(name)
}

#[derive(Debug, Clone)]
struct Entry {
    display_name: String,
    /// Join order; kept across renames.
    seq: u64,
}

/// Maps identified connections to their display identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<ConnectionId, Entry>,
    next_seq: AtomicU64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite the entry for `connection_id`.
    ///
    /// Returns the full user list after the change.
    pub fn register(
        &self,
        connection_id: &ConnectionId,
        display_name: impl Into<String>,
    ) -> Vec<UserInfo> {
        let display_name = display_name.into();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        self.entries
            .entry(connection_id.clone())
            .and_modify(|entry| entry.display_name.clone_from(&display_name))
            .or_insert_with(|| Entry {
                display_name: display_name.clone(),
                seq,
            });

        debug!(connection = %connection_id, name = %display_name, "Registry: registered");
        self.snapshot()
    }

    /// Remove the entry for `connection_id`.
    ///
    /// Returns the removed identity, if any, and the full user list after
    /// the change.
    pub fn unregister(&self, connection_id: &ConnectionId) -> (Option<UserInfo>, Vec<UserInfo>) {
        let removed = self
            .entries
            .remove(connection_id)
            .map(|(id, entry)| UserInfo::new(id, entry.display_name));

        if removed.is_some() {
            debug!(connection = %connection_id, "Registry: unregistered");
        }

        (removed, self.snapshot())
    }

    /// Look up the identity of a connection.
    #[must_use]
    pub fn lookup(&self, connection_id: &ConnectionId) -> Option<UserInfo> {
        self.entries
            .get(connection_id)
            .map(|entry| UserInfo::new(connection_id.clone(), entry.display_name.clone()))
    }

    /// Check if a connection has identified.
    #[must_use]
    pub fn is_registered(&self, connection_id: &ConnectionId) -> bool {
        self.entries.contains_key(connection_id)
    }

    /// All identified connections, in join order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UserInfo> {
        let mut entries: Vec<(u64, UserInfo)> = self
            .entries
            .iter()
            .map(|e| {
                (
                    e.seq,
                    UserInfo::new(e.key().clone(), e.value().display_name.clone()),
                )
            })
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, user)| user).collect()
    }

    /// Ids of all identified connections, unordered.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    fn names(users: &[UserInfo]) -> Vec<&str> {
        users.iter().map(|u| u.display_name.as_str()).collect()
    }

    #[test]
    fn test_register_returns_full_list() {
        let registry = ConnectionRegistry::new();

        let users = registry.register(&id("conn-1"), "alice");
        assert_eq!(names(&users), vec!["alice"]);

        let users = registry.register(&id("conn-2"), "bob");
        assert_eq!(names(&users), vec!["alice", "bob"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_overwrites_in_place() {
        let registry = ConnectionRegistry::new();
        registry.register(&id("conn-1"), "alice");
        registry.register(&id("conn-2"), "bob");

        let users = registry.register(&id("conn-1"), "alicia");
        assert_eq!(names(&users), vec!["alicia", "bob"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister() {
        let registry = ConnectionRegistry::new();
        registry.register(&id("conn-1"), "alice");
        registry.register(&id("conn-2"), "bob");

        let (removed, users) = registry.unregister(&id("conn-2"));
        assert_eq!(removed.unwrap().display_name, "bob");
        assert_eq!(names(&users), vec!["alice"]);

        let (removed, users) = registry.unregister(&id("conn-2"));
        assert!(removed.is_none());
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn test_lookup() {
        let registry = ConnectionRegistry::new();
        registry.register(&id("conn-1"), "alice");

        let user = registry.lookup(&id("conn-1")).unwrap();
        assert_eq!(user.connection_id, id("conn-1"));
        assert_eq!(user.display_name, "alice");
        assert!(registry.lookup(&id("conn-9")).is_none());
    }

    #[test]
    fn test_duplicate_names_are_distinct_entries() {
        let registry = ConnectionRegistry::new();
        registry.register(&id("conn-1"), "sam");
        let users = registry.register(&id("conn-2"), "sam");
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn test_display_name_validation() {
        assert_eq!(validate_display_name("  alice ", 64), Ok("alice"));
        assert!(validate_display_name("", 64).is_err());
        assert!(validate_display_name("   ", 64).is_err());
        assert!(validate_display_name("a\u{7}b", 64).is_err());

        let long_name = "a".repeat(65);
        assert!(validate_display_name(&long_name, 64).is_err());
        assert!(validate_display_name(&long_name, 65).is_ok());
    }
}
