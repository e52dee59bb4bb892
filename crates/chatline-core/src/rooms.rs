use chatline_models::{ChatId, UserId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// In-memory mirror of persistent chat membership: Chat -> Set<UserId>.
///
/// Snapshots are copy-on-write: readers get an `Arc` of a frozen set, so a
/// concurrent membership change can never produce a torn read, and dispatch
/// for one chat never serializes behind writes to another. Written only
/// through the dispatcher's membership-change path (plus lazy seeding from
/// storage), never by socket handlers.
pub struct RoomRegistry {
    rooms: DashMap<ChatId, Arc<HashSet<UserId>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Build the registry from the persistent participant table at startup.
    pub fn from_memberships(rows: Vec<(ChatId, UserId)>) -> Self {
        let mut staging: std::collections::HashMap<ChatId, HashSet<UserId>> =
            std::collections::HashMap::new();
        for (chat_id, user_id) in rows {
            staging.entry(chat_id).or_default().insert(user_id);
        }
        let registry = Self::new();
        let room_count = staging.len();
        for (chat_id, members) in staging {
            registry.rooms.insert(chat_id, Arc::new(members));
        }
        tracing::info!(rooms = room_count, "room registry seeded");
        registry
    }

    /// Latest committed membership snapshot; `None` for an unknown chat.
    pub fn members_of(&self, chat_id: ChatId) -> Option<Arc<HashSet<UserId>>> {
        self.rooms.get(&chat_id).map(|entry| entry.clone())
    }

    pub fn is_member(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.members_of(chat_id)
            .is_some_and(|members| members.contains(&user_id))
    }

    /// Install a new snapshot, returning the one it replaced.
    pub fn set_members(
        &self,
        chat_id: ChatId,
        members: HashSet<UserId>,
    ) -> Option<Arc<HashSet<UserId>>> {
        self.rooms.insert(chat_id, Arc::new(members))
    }

    /// Seed from storage on a cache miss without clobbering a snapshot a
    /// concurrent membership change may have installed first.
    pub fn seed_if_absent(
        &self,
        chat_id: ChatId,
        members: HashSet<UserId>,
    ) -> Arc<HashSet<UserId>> {
        self.rooms
            .entry(chat_id)
            .or_insert_with(|| Arc::new(members))
            .clone()
    }

    pub fn remove_room(&self, chat_id: ChatId) -> Option<Arc<HashSet<UserId>>> {
        self.rooms.remove(&chat_id).map(|(_, members)| members)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_are_immutable_across_membership_changes() {
        let registry = RoomRegistry::new();
        registry.set_members(1, HashSet::from([10, 20]));

        let before = registry.members_of(1).expect("snapshot");
        let replaced = registry.set_members(1, HashSet::from([10]));

        // The held snapshot still reflects the old membership in full.
        assert_eq!(*before, HashSet::from([10, 20]));
        assert_eq!(replaced.as_deref(), Some(&HashSet::from([10, 20])));
        assert_eq!(
            *registry.members_of(1).expect("snapshot"),
            HashSet::from([10])
        );
    }

    #[test]
    fn seed_if_absent_keeps_existing_snapshot() {
        let registry = RoomRegistry::new();
        registry.set_members(1, HashSet::from([10]));

        let seeded = registry.seed_if_absent(1, HashSet::from([99]));
        assert_eq!(*seeded, HashSet::from([10]));

        let fresh = registry.seed_if_absent(2, HashSet::from([7]));
        assert_eq!(*fresh, HashSet::from([7]));
    }

    #[test]
    fn from_memberships_groups_by_chat() {
        let registry =
            RoomRegistry::from_memberships(vec![(1, 10), (1, 20), (2, 10)]);
        assert_eq!(registry.room_count(), 2);
        assert!(registry.is_member(1, 20));
        assert!(registry.is_member(2, 10));
        assert!(!registry.is_member(2, 20));
    }

    #[test]
    fn removed_room_reads_as_unknown() {
        let registry = RoomRegistry::new();
        registry.set_members(1, HashSet::from([10]));
        registry.remove_room(1);
        assert!(registry.members_of(1).is_none());
        assert!(!registry.is_member(1, 10));
    }
}
