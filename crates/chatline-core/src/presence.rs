use chatline_models::{ServerEvent, UserId};
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier assigned per live transport connection; unique for the
/// connection's lifetime only.
pub type ConnectionId = Uuid;

/// Outbound path into a connection's writer task. Sends never block: the
/// channel is unbounded and the actual socket write happens on the far side.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

struct ConnectionHandle {
    user_id: UserId,
    sender: EventSender,
}

/// Bidirectional mapping between users and their live connections.
///
/// A user may hold several connections (tabs, devices); each connection is
/// owned by exactly one user, fixed at registration time. Mutations are
/// serialized per key by the map shards; unrelated users never contend.
pub struct PresenceRegistry {
    by_user: DashMap<UserId, HashSet<ConnectionId>>,
    by_conn: DashMap<ConnectionId, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
            by_conn: DashMap::new(),
        }
    }

    /// Insert the pairing in both maps. Idempotent for a repeated
    /// (user, connection) pair.
    pub fn register(&self, user_id: UserId, conn_id: ConnectionId, sender: EventSender) {
        self.by_conn
            .insert(conn_id, ConnectionHandle { user_id, sender });
        self.by_user.entry(user_id).or_default().insert(conn_id);
    }

    /// Remove the connection from both maps. A no-op when already absent,
    /// so duplicate disconnect signals are harmless. Returns the owning
    /// user when the connection was still registered.
    pub fn unregister(&self, conn_id: ConnectionId) -> Option<UserId> {
        let (_, handle) = self.by_conn.remove(&conn_id)?;
        if let Some(mut conns) = self.by_user.get_mut(&handle.user_id) {
            conns.remove(&conn_id);
        }
        // Drop the entry only while it is still empty; a concurrent
        // register for the same user must win.
        self.by_user
            .remove_if(&handle.user_id, |_, conns| conns.is_empty());
        Some(handle.user_id)
    }

    /// Live fan-out targets for a user; empty when offline (normal state,
    /// not an error).
    pub fn connections_of(&self, user_id: UserId) -> HashSet<ConnectionId> {
        self.by_user
            .get(&user_id)
            .map(|conns| conns.clone())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.by_conn.len()
    }

    /// Best-effort send to one connection. A closed or vanished channel is
    /// absorbed here, never escalated.
    pub fn send(&self, conn_id: ConnectionId, event: ServerEvent) -> bool {
        match self.by_conn.get(&conn_id) {
            Some(handle) => handle.sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver one event to every live connection of a user.
    pub fn send_to_user(&self, user_id: UserId, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for conn_id in self.connections_of(user_id) {
            if self.send(conn_id, event.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver one event to every live connection of every member, at most
    /// once per connection, skipping the originating connection if given.
    pub fn broadcast(
        &self,
        members: &HashSet<UserId>,
        skip: Option<ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        let mut delivered = 0;
        for user_id in members {
            for conn_id in self.connections_of(*user_id) {
                if Some(conn_id) == skip {
                    continue;
                }
                if self.send(conn_id, event.clone()) {
                    delivered += 1;
                } else {
                    tracing::debug!(%conn_id, "dropped event for unreachable connection");
                }
            }
        }
        delivered
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_models::ServerEvent;

    fn connect(
        registry: &PresenceRegistry,
        user_id: UserId,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(user_id, conn_id, tx);
        (conn_id, rx)
    }

    #[test]
    fn register_then_unregister_round_trip() {
        let registry = PresenceRegistry::new();
        let (c1, _rx1) = connect(&registry, 1);
        let (c2, _rx2) = connect(&registry, 1);

        assert_eq!(registry.connections_of(1), HashSet::from([c1, c2]));

        assert_eq!(registry.unregister(c1), Some(1));
        assert_eq!(registry.connections_of(1), HashSet::from([c2]));

        assert_eq!(registry.unregister(c2), Some(1));
        assert!(registry.connections_of(1).is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn duplicate_unregister_is_a_no_op() {
        let registry = PresenceRegistry::new();
        let (c1, _rx1) = connect(&registry, 1);
        let (c2, _rx2) = connect(&registry, 2);

        assert_eq!(registry.unregister(c1), Some(1));
        assert_eq!(registry.unregister(c1), None);
        // Other registrations are untouched.
        assert_eq!(registry.connections_of(2), HashSet::from([c2]));
    }

    #[test]
    fn register_is_idempotent_per_pair() {
        let registry = PresenceRegistry::new();
        let conn_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(1, conn_id, tx.clone());
        registry.register(1, conn_id, tx);
        assert_eq!(registry.connections_of(1).len(), 1);
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn broadcast_skips_origin_and_dead_connections() {
        let registry = PresenceRegistry::new();
        let (c1, mut rx1) = connect(&registry, 1);
        let (_c2, mut rx2) = connect(&registry, 1);
        let (_c3, rx3) = connect(&registry, 2);
        drop(rx3); // closed channel: delivery failure must be absorbed

        let members = HashSet::from([1, 2]);
        let delivered = registry.broadcast(
            &members,
            Some(c1),
            &ServerEvent::RoomJoined { chat_id: 9 },
        );

        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn offline_user_has_empty_connection_set() {
        let registry = PresenceRegistry::new();
        assert!(registry.connections_of(404).is_empty());
        assert_eq!(registry.send_to_user(404, &ServerEvent::RoomLeft { chat_id: 1 }), 0);
    }
}
