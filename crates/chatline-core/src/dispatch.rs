use crate::error::DispatchError;
use crate::presence::{ConnectionId, PresenceRegistry};
use crate::rooms::RoomRegistry;
use crate::snowflake;
use chatline_db::DbError;
use chatline_models::{ChatId, Message, MessageId, ServerEvent, UserId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage boundary consumed by the dispatcher. Durability precedes
/// delivery: a message is fanned out only after `persist_message` returned.
#[allow(async_fn_in_trait)]
pub trait ChatStore: Send + Sync {
    async fn persist_message(
        &self,
        id: MessageId,
        chat_id: ChatId,
        sender_id: UserId,
        body: &str,
    ) -> Result<Message, DbError>;

    /// Authoritative participant list, used to seed the room registry on a
    /// cache miss.
    async fn participants(&self, chat_id: ChatId) -> Result<Vec<UserId>, DbError>;
}

impl ChatStore for chatline_db::DbPool {
    async fn persist_message(
        &self,
        id: MessageId,
        chat_id: ChatId,
        sender_id: UserId,
        body: &str,
    ) -> Result<Message, DbError> {
        chatline_db::messages::create_message(self, id, chat_id, sender_id, body)
            .await
            .map(|row| row.into_message())
    }

    async fn participants(&self, chat_id: ChatId) -> Result<Vec<UserId>, DbError> {
        chatline_db::chats::get_participants(self, chat_id).await
    }
}

/// Transient room-scoped events: no persistence, no retry, no ordering
/// guarantee beyond "was live at publish time".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ephemeral {
    TypingStart,
    TypingStop,
}

/// The realtime delivery core: owns the presence and room registries and
/// routes everything that reaches a live socket.
///
/// Constructed once and passed explicitly to the REST control plane and the
/// gateway, so membership notifications can be exercised without a live
/// transport.
pub struct Dispatcher<S> {
    store: S,
    presence: Arc<PresenceRegistry>,
    rooms: Arc<RoomRegistry>,
    membership_locks: DashMap<ChatId, Arc<Mutex<()>>>,
    node_id: u16,
}

impl<S: ChatStore> Dispatcher<S> {
    pub fn new(store: S, rooms: RoomRegistry, node_id: u16) -> Self {
        Self {
            store,
            presence: Arc::new(PresenceRegistry::new()),
            rooms: Arc::new(rooms),
            membership_locks: DashMap::new(),
            node_id,
        }
    }

    /// Per-chat lock serializing a membership write with the snapshot
    /// install that follows it. Every caller of `membership_changed` or
    /// `room_deleted` must hold this guard from before the storage mutation
    /// until the install returns; otherwise two concurrent mutations can
    /// interleave so that a snapshot read under the older commit is
    /// installed last, leaving the registry disagreeing with storage until
    /// the next membership change.
    pub fn membership_lock(&self, chat_id: ChatId) -> Arc<Mutex<()>> {
        self.membership_locks.entry(chat_id).or_default().clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Current membership snapshot, seeded from storage on a cache miss.
    /// A storage failure during seeding degrades to an empty set; the
    /// membership check downstream then rejects the call.
    async fn members_snapshot(&self, chat_id: ChatId) -> Arc<HashSet<UserId>> {
        if let Some(members) = self.rooms.members_of(chat_id) {
            return members;
        }
        match self.store.participants(chat_id).await {
            Ok(participants) if !participants.is_empty() => self
                .rooms
                .seed_if_absent(chat_id, participants.into_iter().collect()),
            Ok(_) => Arc::new(HashSet::new()),
            Err(err) => {
                tracing::warn!(chat_id, error = %err, "failed to seed room membership");
                Arc::new(HashSet::new())
            }
        }
    }

    /// Persist a message and fan it out to every live connection of every
    /// current participant.
    ///
    /// `origin` is the connection the send arrived on, if any; it is
    /// excluded from the fan-out because it receives the message exactly
    /// once through the return value (REST response body or gateway ack).
    pub async fn dispatch(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        origin: Option<ConnectionId>,
        body: &str,
    ) -> Result<Message, DispatchError> {
        let members = self.members_snapshot(chat_id).await;
        if !members.contains(&sender_id) {
            return Err(DispatchError::NotAParticipant);
        }

        let id = snowflake::generate(self.node_id);
        let message = self
            .store
            .persist_message(id, chat_id, sender_id, body)
            .await
            .map_err(DispatchError::Persistence)?;

        let delivered = self.presence.broadcast(
            &members,
            origin,
            &ServerEvent::MessageReceived(message.clone()),
        );
        tracing::debug!(chat_id, sender_id, delivered, "message dispatched");

        Ok(message)
    }

    /// Fan out a transient event to the chat's current membership. Same
    /// membership gate as `dispatch`, no persistence step.
    pub async fn publish(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        origin: Option<ConnectionId>,
        kind: Ephemeral,
    ) -> Result<(), DispatchError> {
        let members = self.members_snapshot(chat_id).await;
        if !members.contains(&sender_id) {
            return Err(DispatchError::NotAParticipant);
        }

        let event = match kind {
            Ephemeral::TypingStart => ServerEvent::TypingStart { chat_id, sender_id },
            Ephemeral::TypingStop => ServerEvent::TypingStop { chat_id, sender_id },
        };
        self.presence.broadcast(&members, origin, &event);
        Ok(())
    }

    /// Sole write path into the room registry, invoked by the REST control
    /// plane after it durably committed a membership change, under the
    /// chat's [`membership_lock`](Self::membership_lock). The new snapshot
    /// is installed before any notification goes out and before this
    /// returns, so every later `dispatch`/`publish` sees it.
    pub fn membership_changed(&self, chat_id: ChatId, new_members: HashSet<UserId>) {
        let previous = self
            .rooms
            .set_members(chat_id, new_members.clone())
            .unwrap_or_default();

        for user_id in new_members.difference(&previous) {
            self.presence
                .send_to_user(*user_id, &ServerEvent::RoomJoined { chat_id });
        }
        for user_id in previous.difference(&new_members) {
            self.presence
                .send_to_user(*user_id, &ServerEvent::RoomLeft { chat_id });
        }
        tracing::debug!(chat_id, members = new_members.len(), "membership updated");
    }

    /// The chat was deleted upstream: drop the room and tell every former
    /// member's live connections to leave its scope.
    pub fn room_deleted(&self, chat_id: ChatId) {
        let Some(previous) = self.rooms.remove_room(chat_id) else {
            return;
        };
        for user_id in previous.iter() {
            self.presence
                .send_to_user(*user_id, &ServerEvent::RoomLeft { chat_id });
        }
        tracing::debug!(chat_id, "room deleted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[derive(Default)]
    struct MockStore {
        participants: Mutex<HashMap<ChatId, Vec<UserId>>>,
        persisted: Mutex<Vec<Message>>,
        fail_persist: AtomicBool,
    }

    impl MockStore {
        fn persisted_count(&self) -> usize {
            self.persisted.lock().unwrap().len()
        }
    }

    impl ChatStore for MockStore {
        async fn persist_message(
            &self,
            id: MessageId,
            chat_id: ChatId,
            sender_id: UserId,
            body: &str,
        ) -> Result<Message, DbError> {
            if self.fail_persist.load(Ordering::SeqCst) {
                return Err(DbError::Sqlx(sqlx::Error::PoolClosed));
            }
            let message = Message {
                id,
                chat_id,
                sender_id,
                body: body.to_string(),
                created_at: Utc::now(),
            };
            self.persisted.lock().unwrap().push(message.clone());
            Ok(message)
        }

        async fn participants(&self, chat_id: ChatId) -> Result<Vec<UserId>, DbError> {
            Ok(self
                .participants
                .lock()
                .unwrap()
                .get(&chat_id)
                .cloned()
                .unwrap_or_default())
        }
    }

    const CHAT: ChatId = 77;
    const ALICE: UserId = 1;
    const BOB: UserId = 2;
    const MALLORY: UserId = 9;

    fn dispatcher_with_members(members: &[UserId]) -> Dispatcher<MockStore> {
        let rooms = RoomRegistry::new();
        rooms.set_members(CHAT, members.iter().copied().collect());
        Dispatcher::new(MockStore::default(), rooms, 1)
    }

    fn connect(
        dispatcher: &Dispatcher<MockStore>,
        user_id: UserId,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.presence().register(user_id, conn_id, tx);
        (conn_id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn dispatch_fans_out_to_all_member_connections_except_origin() {
        let dispatcher = dispatcher_with_members(&[ALICE, BOB]);
        let (c1, mut rx1) = connect(&dispatcher, ALICE);
        let (_c2, mut rx2) = connect(&dispatcher, ALICE);
        let (_c3, mut rx3) = connect(&dispatcher, BOB);
        let (_c4, mut rx4) = connect(&dispatcher, MALLORY); // not a member

        let message = dispatcher
            .dispatch(CHAT, ALICE, Some(c1), "hi")
            .await
            .expect("dispatch");
        assert_eq!(message.body, "hi");
        assert_eq!(dispatcher.store().persisted_count(), 1);

        // Origin connection is excluded; the sender's other device and the
        // other member receive exactly one copy each.
        assert!(drain(&mut rx1).is_empty());
        assert!(matches!(
            drain(&mut rx2).as_slice(),
            [ServerEvent::MessageReceived(m)] if m.id == message.id
        ));
        assert!(matches!(
            drain(&mut rx3).as_slice(),
            [ServerEvent::MessageReceived(_)]
        ));
        assert!(drain(&mut rx4).is_empty());
    }

    #[tokio::test]
    async fn non_participant_dispatch_is_rejected_without_side_effects() {
        let dispatcher = dispatcher_with_members(&[ALICE, BOB]);
        let (_c1, mut rx1) = connect(&dispatcher, ALICE);

        let err = dispatcher
            .dispatch(CHAT, MALLORY, None, "intrusion")
            .await
            .expect_err("must reject");
        assert!(matches!(err, DispatchError::NotAParticipant));
        assert_eq!(dispatcher.store().persisted_count(), 0);
        assert!(drain(&mut rx1).is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_suppresses_fan_out() {
        let dispatcher = dispatcher_with_members(&[ALICE, BOB]);
        let (_c1, mut rx1) = connect(&dispatcher, BOB);
        dispatcher.store().fail_persist.store(true, Ordering::SeqCst);

        let err = dispatcher
            .dispatch(CHAT, ALICE, None, "lost")
            .await
            .expect_err("must fail");
        assert!(matches!(err, DispatchError::Persistence(_)));
        assert!(drain(&mut rx1).is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_members_but_persists_nothing() {
        let dispatcher = dispatcher_with_members(&[ALICE, BOB]);
        let (c1, mut rx1) = connect(&dispatcher, ALICE);
        let (_c2, mut rx2) = connect(&dispatcher, BOB);

        dispatcher
            .publish(CHAT, ALICE, Some(c1), Ephemeral::TypingStart)
            .await
            .expect("publish");

        assert!(drain(&mut rx1).is_empty());
        assert!(matches!(
            drain(&mut rx2).as_slice(),
            [ServerEvent::TypingStart { chat_id: CHAT, sender_id: ALICE }]
        ));
        assert_eq!(dispatcher.store().persisted_count(), 0);

        let err = dispatcher
            .publish(CHAT, MALLORY, None, Ephemeral::TypingStop)
            .await
            .expect_err("non-member publish");
        assert!(matches!(err, DispatchError::NotAParticipant));
    }

    #[tokio::test]
    async fn membership_change_governs_later_dispatches() {
        let dispatcher = dispatcher_with_members(&[ALICE, BOB]);
        let (_c1, mut rx1) = connect(&dispatcher, ALICE);
        let (_c2, mut rx2) = connect(&dispatcher, BOB);

        dispatcher.membership_changed(CHAT, HashSet::from([ALICE]));
        assert!(matches!(
            drain(&mut rx2).as_slice(),
            [ServerEvent::RoomLeft { chat_id: CHAT }]
        ));

        // Bob's stale local state does not let him back in.
        assert!(matches!(
            dispatcher.dispatch(CHAT, BOB, None, "stale").await,
            Err(DispatchError::NotAParticipant)
        ));

        dispatcher
            .dispatch(CHAT, ALICE, None, "to myself")
            .await
            .expect("dispatch");
        assert_eq!(drain(&mut rx1).len(), 1);
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn membership_change_notifies_added_users() {
        let dispatcher = dispatcher_with_members(&[ALICE]);
        let (_c1, mut rx1) = connect(&dispatcher, BOB);

        dispatcher.membership_changed(CHAT, HashSet::from([ALICE, BOB]));
        assert!(matches!(
            drain(&mut rx1).as_slice(),
            [ServerEvent::RoomJoined { chat_id: CHAT }]
        ));
    }

    #[tokio::test]
    async fn room_deletion_evicts_all_members() {
        let dispatcher = dispatcher_with_members(&[ALICE, BOB]);
        let (_c1, mut rx1) = connect(&dispatcher, ALICE);
        let (_c2, mut rx2) = connect(&dispatcher, BOB);

        dispatcher.room_deleted(CHAT);
        assert!(matches!(
            drain(&mut rx1).as_slice(),
            [ServerEvent::RoomLeft { chat_id: CHAT }]
        ));
        assert!(matches!(
            drain(&mut rx2).as_slice(),
            [ServerEvent::RoomLeft { chat_id: CHAT }]
        ));
        assert!(dispatcher.rooms().members_of(CHAT).is_none());
    }

    #[tokio::test]
    async fn unknown_chat_is_seeded_lazily_from_storage() {
        let dispatcher = Dispatcher::new(MockStore::default(), RoomRegistry::new(), 1);
        dispatcher
            .store()
            .participants
            .lock()
            .unwrap()
            .insert(CHAT, vec![ALICE, BOB]);
        let (_c1, mut rx1) = connect(&dispatcher, BOB);

        dispatcher
            .dispatch(CHAT, ALICE, None, "first contact")
            .await
            .expect("dispatch after lazy seed");
        assert_eq!(drain(&mut rx1).len(), 1);
        assert!(dispatcher.rooms().is_member(CHAT, BOB));
    }

    #[tokio::test]
    async fn membership_lock_is_shared_per_chat() {
        let dispatcher = dispatcher_with_members(&[ALICE]);
        let a = dispatcher.membership_lock(CHAT);
        let b = dispatcher.membership_lock(CHAT);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &dispatcher.membership_lock(CHAT + 1)));

        // A held guard keeps the next mutation out until it is dropped.
        let guard = a.lock_owned().await;
        assert!(b.try_lock().is_err());
        drop(guard);
        assert!(b.try_lock().is_ok());
    }

    #[tokio::test]
    async fn disconnected_member_simply_receives_nothing() {
        let dispatcher = dispatcher_with_members(&[ALICE, BOB]);
        let (c1, rx1) = connect(&dispatcher, BOB);
        dispatcher.presence().unregister(c1);
        drop(rx1);

        let message = dispatcher
            .dispatch(CHAT, ALICE, None, "to nobody")
            .await
            .expect("dispatch");
        // Still durably persisted; recovery is the history read path.
        assert_eq!(dispatcher.store().persisted_count(), 1);
        assert_eq!(message.chat_id, CHAT);
    }
}
