//! Presence registry for Courier.
//!
//! The registry maps each user identity to the set of live connections
//! currently bound to it. A user is "online" exactly while at least one
//! connection is registered under their identity.

use crate::outbox::ConnectionId;
use courier_protocol::UserId;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Mapping from user identity to live connections.
///
/// A forward map drives fan-out lookups; a reverse index makes disconnect
/// cleanup O(1) in the number of identities the connection holds, rather
/// than a scan of every user. Both indices mutate together, always within
/// a single method call, so callers that serialize access (the [`Relay`]
/// holds the registry behind a mutex) never observe them diverged.
///
/// Invariants:
/// - A connection appears at most once under a given user (joins are
///   idempotent).
/// - A user key exists iff its connection list is non-empty.
///
/// [`Relay`]: crate::relay::Relay
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// User identity -> connections, in join order. Ordered by user so the
    /// online-users snapshot is deterministic.
    users: BTreeMap<UserId, Vec<ConnectionId>>,
    /// Reverse index: connection -> identities it is registered under.
    connections: HashMap<ConnectionId, HashSet<UserId>>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a user identity.
    ///
    /// An empty `user_id` is ignored, as is a duplicate join of the same
    /// `(user, connection)` pair. Returns `true` if the registry changed.
    pub fn join(&mut self, user_id: &str, connection_id: &ConnectionId) -> bool {
        if user_id.is_empty() {
            return false;
        }

        if let Some(connections) = self.users.get(user_id) {
            if connections.contains(connection_id) {
                return false;
            }
        }
        self.users
            .entry(user_id.to_string())
            .or_default()
            .push(connection_id.clone());

        self.connections
            .entry(connection_id.clone())
            .or_default()
            .insert(user_id.to_string());

        debug!(user = %user_id, connection = %connection_id, "Presence: joined");
        true
    }

    /// Unbind a connection from a user identity.
    ///
    /// No-op when the user or the binding does not exist. Returns `true`
    /// if the registry changed. An emptied user entry is pruned.
    pub fn leave(&mut self, user_id: &str, connection_id: &ConnectionId) -> bool {
        let Some(connections) = self.users.get_mut(user_id) else {
            return false;
        };
        let Some(pos) = connections.iter().position(|c| c == connection_id) else {
            return false;
        };
        connections.remove(pos);
        if connections.is_empty() {
            self.users.remove(user_id);
        }

        if let Some(identities) = self.connections.get_mut(connection_id) {
            identities.remove(user_id);
            if identities.is_empty() {
                self.connections.remove(connection_id);
            }
        }

        debug!(user = %user_id, connection = %connection_id, "Presence: left");
        true
    }

    /// Remove a connection from every identity it is registered under.
    ///
    /// Returns the affected user IDs. Emptied entries are pruned.
    pub fn disconnect(&mut self, connection_id: &ConnectionId) -> Vec<UserId> {
        let Some(identities) = self.connections.remove(connection_id) else {
            return Vec::new();
        };

        let mut affected: Vec<UserId> = identities.into_iter().collect();
        affected.sort_unstable();

        for user_id in &affected {
            if let Some(connections) = self.users.get_mut(user_id) {
                connections.retain(|c| c != connection_id);
                if connections.is_empty() {
                    self.users.remove(user_id);
                }
            }
        }

        debug!(connection = %connection_id, users = affected.len(), "Presence: disconnected");
        affected
    }

    /// Get the connections bound to a user, in join order.
    ///
    /// Returns an empty vector for unknown users.
    #[must_use]
    pub fn connections(&self, user_id: &str) -> Vec<ConnectionId> {
        self.users.get(user_id).cloned().unwrap_or_default()
    }

    /// Get the full ordered snapshot of online user identities.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.users.keys().cloned().collect()
    }

    /// Check if a user has at least one connection.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Number of online users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Check if no identity is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut registry = PresenceRegistry::new();

        assert!(registry.join("alice", &conn("s1")));
        assert!(!registry.join("alice", &conn("s1")));
        assert!(!registry.join("alice", &conn("s1")));

        assert_eq!(registry.connections("alice"), vec![conn("s1")]);
    }

    #[test]
    fn test_join_empty_user_is_noop() {
        let mut registry = PresenceRegistry::new();

        assert!(!registry.join("", &conn("s1")));
        assert!(registry.is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_multiple_connections_per_user() {
        let mut registry = PresenceRegistry::new();

        registry.join("alice", &conn("s1"));
        registry.join("alice", &conn("s2"));

        assert_eq!(registry.connections("alice"), vec![conn("s1"), conn("s2")]);
        assert_eq!(registry.user_count(), 1);
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn test_leave_prunes_empty_entry() {
        let mut registry = PresenceRegistry::new();

        registry.join("alice", &conn("s1"));
        assert!(registry.leave("alice", &conn("s1")));

        assert!(!registry.is_online("alice"));
        assert!(registry.is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_leave_unknown_is_noop() {
        let mut registry = PresenceRegistry::new();
        registry.join("alice", &conn("s1"));

        assert!(!registry.leave("bob", &conn("s1")));
        assert!(!registry.leave("alice", &conn("s2")));
        assert!(registry.is_online("alice"));
    }

    #[test]
    fn test_disconnect_removes_single_binding() {
        let mut registry = PresenceRegistry::new();
        registry.join("alice", &conn("s1"));

        assert_eq!(registry.disconnect(&conn("s1")), vec!["alice".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_disconnect_scrubs_all_identities() {
        let mut registry = PresenceRegistry::new();

        // Same connection under two identities.
        registry.join("alice", &conn("s1"));
        registry.join("bob", &conn("s1"));
        registry.join("bob", &conn("s2"));

        let affected = registry.disconnect(&conn("s1"));
        assert_eq!(affected, vec!["alice".to_string(), "bob".to_string()]);

        assert!(!registry.is_online("alice"));
        assert_eq!(registry.connections("bob"), vec![conn("s2")]);
    }

    #[test]
    fn test_disconnect_unknown_connection() {
        let mut registry = PresenceRegistry::new();
        registry.join("alice", &conn("s1"));

        assert!(registry.disconnect(&conn("s9")).is_empty());
        assert!(registry.is_online("alice"));
    }

    #[test]
    fn test_online_users_snapshot_is_ordered() {
        let mut registry = PresenceRegistry::new();

        registry.join("carol", &conn("s3"));
        registry.join("alice", &conn("s1"));
        registry.join("bob", &conn("s2"));

        assert_eq!(
            registry.online_users(),
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()]
        );
    }
}
