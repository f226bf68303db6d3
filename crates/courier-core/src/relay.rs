//! Fan-out message relay for Courier.
//!
//! The relay owns all shared state: the presence registry and the outbox of
//! every attached connection. Inbound events mutate the registry and fan
//! messages out to the connections bound to the receiver identity.

use crate::outbox::{ConnectionId, Outbox};
use crate::registry::PresenceRegistry;
use courier_protocol::{Envelope, ServerEvent};
use dashmap::DashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Whether to broadcast the online-users snapshot to every connection
    /// after a presence change.
    pub broadcast_online_users: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            broadcast_online_users: true,
        }
    }
}

/// The central message relay.
///
/// All registry access is serialized behind a mutex so no partial mutation
/// is ever visible; fan-out works on snapshots taken under the lock and
/// emits without holding it, so a slow receiver never blocks a mutation.
///
/// Invalid input (empty user, unknown receiver, repeated joins) is absorbed
/// as a silent no-op; nothing here surfaces an error to the caller.
pub struct Relay {
    /// Presence registry; forward map and reverse index mutate as one unit.
    registry: Mutex<PresenceRegistry>,
    /// Outboxes of all attached connections.
    outboxes: DashMap<ConnectionId, Outbox>,
    /// Configuration.
    config: RelayConfig,
}

impl Relay {
    /// Create a new relay with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a new relay with custom configuration.
    #[must_use]
    pub fn with_config(config: RelayConfig) -> Self {
        info!("Creating relay with config: {:?}", config);
        Self {
            registry: Mutex::new(PresenceRegistry::new()),
            outboxes: DashMap::new(),
            config,
        }
    }

    /// Get relay statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        let registry = self.registry();
        RelayStats {
            online_users: registry.user_count(),
            registered_connections: registry.connection_count(),
            attached_connections: self.outboxes.len(),
        }
    }

    /// Attach a connection, returning the receiving half of its outbox.
    ///
    /// The transport drains the receiver and writes each event to the wire.
    pub fn attach(&self, connection_id: &ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (outbox, receiver) = Outbox::new();
        self.outboxes.insert(connection_id.clone(), outbox);
        debug!(connection = %connection_id, "Connection attached");
        receiver
    }

    /// Bind a connection to a user identity.
    ///
    /// Empty identities and repeated joins of the same pair are silent
    /// no-ops; when the registry actually changed, the online-users
    /// snapshot is broadcast (if enabled).
    pub fn join(&self, user_id: &str, connection_id: &ConnectionId) {
        let changed = self.registry().join(user_id, connection_id);
        if changed && self.config.broadcast_online_users {
            self.broadcast_online_users();
        }
    }

    /// Unbind a connection from a user identity.
    ///
    /// A silent no-op when the binding does not exist; broadcasts the
    /// online-users snapshot on an actual change (if enabled).
    pub fn leave(&self, user_id: &str, connection_id: &ConnectionId) {
        let changed = self.registry().leave(user_id, connection_id);
        if changed && self.config.broadcast_online_users {
            self.broadcast_online_users();
        }
    }

    /// Route a message to every connection of the receiver identity, and
    /// always echo it back to the sending connection.
    ///
    /// The envelope passes through verbatim. An unknown receiver means the
    /// message is dropped for recipients and only the echo occurs. Returns
    /// the number of emissions.
    pub fn route(&self, envelope: Envelope, sender: &ConnectionId) -> usize {
        // Snapshot under the lock, emit outside it.
        let recipients = self.registry().connections(&envelope.receiver_id);

        let mut emitted = 0;
        for connection_id in &recipients {
            if let Some(outbox) = self.outboxes.get(connection_id) {
                outbox.emit(ServerEvent::message(envelope.clone()));
                emitted += 1;
            }
        }

        // Echo to sender, even when the sender is itself a recipient.
        if let Some(outbox) = self.outboxes.get(sender) {
            outbox.emit(ServerEvent::message(envelope));
            emitted += 1;
        }

        trace!(
            sender = %sender,
            recipients = recipients.len(),
            emitted,
            "Routed message"
        );
        emitted
    }

    /// Detach a connection and scrub it from every identity.
    ///
    /// Called by the transport on connection teardown, expected or abrupt.
    /// Broadcasts the online-users snapshot once afterwards (if enabled),
    /// regardless of how many entries changed.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        self.outboxes.remove(connection_id);
        let affected = self.registry().disconnect(connection_id);
        debug!(connection = %connection_id, users = affected.len(), "Connection detached");

        if self.config.broadcast_online_users {
            self.broadcast_online_users();
        }
    }

    /// Emit the full ordered online-users snapshot to every attached
    /// connection. Emits an empty list when nobody is online.
    pub fn broadcast_online_users(&self) {
        let users = self.registry().online_users();
        trace!(users = users.len(), "Broadcasting online users");

        for entry in self.outboxes.iter() {
            entry.value().emit(ServerEvent::online_users(users.clone()));
        }
    }

    // Registry mutations never panic while holding the lock, so a poisoned
    // mutex still guards consistent state.
    fn registry(&self) -> MutexGuard<'_, PresenceRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay statistics.
#[derive(Debug, Clone)]
pub struct RelayStats {
    /// Number of identities with at least one connection.
    pub online_users: usize,
    /// Number of connections registered under some identity.
    pub registered_connections: usize,
    /// Number of attached connections (outboxes), registered or not.
    pub attached_connections: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn quiet_relay() -> Relay {
        Relay::with_config(RelayConfig {
            broadcast_online_users: false,
        })
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_route_fans_out_and_echoes() {
        let relay = quiet_relay();

        let mut rx1 = relay.attach(&conn("c1"));
        let mut rx2 = relay.attach(&conn("c2"));
        let mut rx3 = relay.attach(&conn("c3"));

        relay.join("alice", &conn("c1"));
        relay.join("alice", &conn("c2"));

        let envelope = Envelope::new("alice").with_field("text", json!("hi"));
        let emitted = relay.route(envelope.clone(), &conn("c3"));
        assert_eq!(emitted, 3);

        // Each target gets the unmodified envelope.
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let events = drain(rx);
            assert_eq!(events, vec![ServerEvent::message(envelope.clone())]);
        }
    }

    #[test]
    fn test_route_unknown_receiver_only_echoes() {
        let relay = quiet_relay();
        let mut rx = relay.attach(&conn("c3"));

        let emitted = relay.route(Envelope::new("nobody"), &conn("c3"));
        assert_eq!(emitted, 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_route_sender_among_recipients_gets_duplicate() {
        let relay = quiet_relay();
        let mut rx = relay.attach(&conn("c1"));
        relay.join("alice", &conn("c1"));

        // Delivered once as recipient and once as echo.
        let emitted = relay.route(Envelope::new("alice"), &conn("c1"));
        assert_eq!(emitted, 2);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_join_empty_user_no_mutation_no_emission() {
        let relay = Relay::new();
        let mut rx = relay.attach(&conn("c1"));

        relay.join("", &conn("c1"));

        assert_eq!(relay.stats().online_users, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_duplicate_join_does_not_rebroadcast() {
        let relay = Relay::new();
        let mut rx = relay.attach(&conn("c1"));

        relay.join("alice", &conn("c1"));
        relay.join("alice", &conn("c1"));

        let broadcasts = drain(&mut rx);
        assert_eq!(
            broadcasts,
            vec![ServerEvent::online_users(vec!["alice".into()])]
        );
    }

    #[test]
    fn test_message_scenario() {
        // join("alice","s1"); join("bob","s2"); message to bob from s1.
        let relay = quiet_relay();
        let mut rx1 = relay.attach(&conn("s1"));
        let mut rx2 = relay.attach(&conn("s2"));

        relay.join("alice", &conn("s1"));
        relay.join("bob", &conn("s2"));

        let envelope = Envelope::new("bob").with_field("text", json!("hi"));
        relay.route(envelope.clone(), &conn("s1"));

        assert_eq!(drain(&mut rx2), vec![ServerEvent::message(envelope.clone())]);
        assert_eq!(drain(&mut rx1), vec![ServerEvent::message(envelope)]);

        // Routing never mutates the registry.
        let stats = relay.stats();
        assert_eq!(stats.online_users, 2);
        assert_eq!(stats.registered_connections, 2);
    }

    #[test]
    fn test_disconnect_scenario() {
        // join("alice","s1"); disconnect("s1") => registry empty, and the
        // next broadcast carries an empty identity set.
        let relay = Relay::new();
        let mut rx1 = relay.attach(&conn("s1"));
        let mut rx2 = relay.attach(&conn("s2"));

        relay.join("alice", &conn("s1"));
        drain(&mut rx1);
        drain(&mut rx2);

        relay.disconnect(&conn("s1"));

        assert_eq!(relay.stats().online_users, 0);
        assert_eq!(drain(&mut rx2), vec![ServerEvent::online_users(vec![])]);
        // s1's outbox is gone; nothing more arrives there.
        assert!(drain(&mut rx1).is_empty());
    }

    #[test]
    fn test_disconnect_scrubs_all_identities() {
        let relay = quiet_relay();
        let _rx1 = relay.attach(&conn("s1"));
        let _rx2 = relay.attach(&conn("s2"));

        relay.join("alice", &conn("s1"));
        relay.join("bob", &conn("s1"));
        relay.join("bob", &conn("s2"));

        relay.disconnect(&conn("s1"));

        let stats = relay.stats();
        assert_eq!(stats.online_users, 1); // bob, via s2
        assert_eq!(stats.registered_connections, 1);
        assert_eq!(stats.attached_connections, 1);
    }

    #[test]
    fn test_leave_broadcasts_on_change_only() {
        let relay = Relay::new();
        let mut rx = relay.attach(&conn("s1"));

        relay.join("alice", &conn("s1"));
        drain(&mut rx);

        // Unknown binding: silent no-op, no broadcast.
        relay.leave("bob", &conn("s1"));
        assert!(drain(&mut rx).is_empty());

        relay.leave("alice", &conn("s1"));
        assert_eq!(drain(&mut rx), vec![ServerEvent::online_users(vec![])]);
    }

    #[test]
    fn test_broadcast_reaches_unregistered_connections() {
        let relay = Relay::new();
        // Attached but never joined: still receives presence snapshots.
        let mut rx_lurker = relay.attach(&conn("lurker"));
        let _rx1 = relay.attach(&conn("s1"));

        relay.join("alice", &conn("s1"));

        assert_eq!(
            drain(&mut rx_lurker),
            vec![ServerEvent::online_users(vec!["alice".into()])]
        );
    }
}
