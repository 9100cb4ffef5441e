use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::models::{PresenceMessage, RelayError, ServerEvent, SessionId, Snapshot};

/// Outbound queue of one session. Drained by the connection's writer task.
pub type Outbox = mpsc::Sender<Arc<ServerEvent>>;

/// Fan-out group for one document id. Holds no document data.
struct Room {
    members: HashMap<SessionId, Outbox>,
    history: VecDeque<String>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    /// Enqueue `event` for every member except `exclude`. Never waits: a full
    /// or closed queue skips that member only.
    fn fan_out(&self, document_id: &str, event: ServerEvent, exclude: Option<SessionId>) -> BroadcastReport {
        let event = Arc::new(event);
        let mut report = BroadcastReport::default();

        for (session_id, outbox) in &self.members {
            if Some(*session_id) == exclude {
                continue;
            }
            match outbox.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    let reason = match e {
                        TrySendError::Full(_) => "queue full",
                        TrySendError::Closed(_) => "connection closed",
                    };
                    warn!(
                        "Skipping receiver in room {}: {} ({})",
                        document_id,
                        RelayError::DeliveryFailure(*session_id),
                        reason
                    );
                    report.skipped.push(*session_id);
                }
            }
        }
        report
    }

    fn announce_presence(&self, document_id: &str) {
        let presence = PresenceMessage { members: self.members.len() };
        self.fan_out(document_id, ServerEvent::Presence(presence), None);
    }
}

/// Outcome of one broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub skipped: Vec<SessionId>,
}

/// What a session learns when it joins a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRoom {
    pub members: usize,
    pub history: Vec<String>,
}

/// Maps document ids to the sessions currently subscribed to them.
///
/// Rooms are created on first join and dropped as soon as the last member
/// leaves. Join and leave hold the registry write lock for the whole
/// membership change, so a room is never evicted under a joining session.
/// Broadcasts hold the room lock while enqueueing, which gives every member
/// of a room the same event order.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
    history_limit: usize,
}

impl RoomRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    /// Add `session_id` to the room for `document_id`, creating the room if
    /// needed, and queue `load-document` and `load-messages` for it.
    ///
    /// Both events are queued under the room lock before the session becomes
    /// a member, so nothing broadcast to the room can overtake the snapshot.
    /// A new member triggers `presence` for the whole room. Joining twice with
    /// the same session keeps one membership.
    pub async fn join(
        &self,
        document_id: &str,
        session_id: SessionId,
        outbox: Outbox,
        snapshot: Snapshot,
    ) -> Result<JoinedRoom, RelayError> {
        // Reserve both slots before taking any lock.
        let load_slot = outbox
            .reserve()
            .await
            .map_err(|_| RelayError::DeliveryFailure(session_id))?;
        let history_slot = outbox
            .reserve()
            .await
            .map_err(|_| RelayError::DeliveryFailure(session_id))?;

        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(document_id.to_string())
            .or_insert_with(|| {
                info!("Created room for document {}", document_id);
                Arc::new(Mutex::new(Room::new()))
            })
            .clone();

        let mut room = room.lock().await;
        let history: Vec<String> = room.history.iter().cloned().collect();
        load_slot.send(Arc::new(ServerEvent::LoadDocument(snapshot)));
        history_slot.send(Arc::new(ServerEvent::LoadMessages(history.clone())));

        if room.members.insert(session_id, outbox).is_none() {
            debug!("Session {} joined room {} ({} members)", session_id, document_id, room.members.len());
            room.announce_presence(document_id);
        }

        Ok(JoinedRoom {
            members: room.members.len(),
            history,
        })
    }

    /// Remove `session_id` from the room. An emptied room is dropped along
    /// with its chat history, otherwise the remaining members get `presence`.
    pub async fn leave(&self, document_id: &str, session_id: SessionId) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(document_id).cloned() else {
            return;
        };

        let mut room = room.lock().await;
        let removed = room.members.remove(&session_id).is_some();
        if removed {
            debug!("Session {} left room {}", session_id, document_id);
        }
        if room.members.is_empty() {
            rooms.remove(document_id);
            info!("Removed empty room for document {}", document_id);
        } else if removed {
            room.announce_presence(document_id);
        }
    }

    /// Deliver `event` to every member of the room except `exclude`.
    pub async fn broadcast(&self, document_id: &str, event: ServerEvent, exclude: Option<SessionId>) -> BroadcastReport {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(document_id) else {
            debug!("Broadcast to unknown room {} dropped", document_id);
            return BroadcastReport::default();
        };
        let room = room.lock().await;
        room.fan_out(document_id, event, exclude)
    }

    /// Record a chat message in the room history and relay it.
    pub async fn broadcast_message(&self, document_id: &str, text: String, exclude: Option<SessionId>) -> BroadcastReport {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(document_id) else {
            debug!("Chat message to unknown room {} dropped", document_id);
            return BroadcastReport::default();
        };
        let mut room = room.lock().await;

        if self.history_limit > 0 {
            room.history.push_back(text.clone());
            while room.history.len() > self.history_limit {
                room.history.pop_front();
            }
        }
        room.fan_out(document_id, ServerEvent::ReceiveMessage(text), exclude)
    }

    pub async fn is_member(&self, document_id: &str, session_id: SessionId) -> bool {
        let rooms = self.rooms.read().await;
        match rooms.get(document_id) {
            Some(room) => room.lock().await.members.contains_key(&session_id),
            None => false,
        }
    }

    pub async fn member_count(&self, document_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        match rooms.get(document_id) {
            Some(room) => room.lock().await.members.len(),
            None => 0,
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        let mut total = 0;
        for room in rooms.values() {
            total += room.lock().await.members.len();
        }
        total
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::Receiver;
    use uuid::Uuid;

    fn member(capacity: usize) -> (SessionId, Outbox, Receiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Uuid::new_v4(), tx, rx)
    }

    async fn joined(registry: &RoomRegistry, document_id: &str, capacity: usize) -> (SessionId, Receiver<Arc<ServerEvent>>) {
        let (id, tx, rx) = member(capacity);
        registry.join(document_id, id, tx, json!("")).await.unwrap();
        (id, rx)
    }

    fn drain(rx: &mut Receiver<Arc<ServerEvent>>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    fn presence(members: usize) -> ServerEvent {
        ServerEvent::Presence(PresenceMessage { members })
    }

    // =========================================================================
    // Membership
    // =========================================================================

    #[tokio::test]
    async fn test_join_creates_room_lazily() {
        let registry = RoomRegistry::new(10);
        assert_eq!(registry.room_count().await, 0);

        let (a, tx_a, _rx_a) = member(8);
        let joined = registry.join("doc1", a, tx_a, json!("")).await.unwrap();
        assert_eq!(joined.members, 1);
        assert!(joined.history.is_empty());
        assert_eq!(registry.room_count().await, 1);
        assert!(registry.is_member("doc1", a).await);
    }

    #[tokio::test]
    async fn test_join_queues_snapshot_first() {
        let registry = RoomRegistry::new(10);
        let (_a, mut rx_a) = joined(&registry, "doc1", 8).await;
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerEvent::LoadDocument(json!("")),
                ServerEvent::LoadMessages(vec![]),
                presence(1),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejoin_is_idempotent() {
        let registry = RoomRegistry::new(10);
        let (a, tx_a, mut rx_a) = member(8);
        registry.join("doc1", a, tx_a.clone(), json!("")).await.unwrap();
        drain(&mut rx_a);

        let joined = registry.join("doc1", a, tx_a, json!("v2")).await.unwrap();
        assert_eq!(joined.members, 1);
        assert_eq!(registry.session_count().await, 1);
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::LoadDocument(json!("v2")), ServerEvent::LoadMessages(vec![])]
        );
    }

    #[tokio::test]
    async fn test_join_with_closed_outbox_fails() {
        let registry = RoomRegistry::new(10);
        let (a, tx_a, rx_a) = member(8);
        drop(rx_a);

        let result = registry.join("doc1", a, tx_a, json!("")).await;
        assert!(matches!(result, Err(RelayError::DeliveryFailure(id)) if id == a));
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_evicts_empty_room() {
        let registry = RoomRegistry::new(10);
        let (a, _rx_a) = joined(&registry, "doc1", 8).await;
        let (b, _rx_b) = joined(&registry, "doc1", 8).await;

        registry.leave("doc1", a).await;
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(registry.member_count("doc1").await, 1);

        registry.leave("doc1", b).await;
        assert_eq!(registry.room_count().await, 0);
        assert!(!registry.is_member("doc1", b).await);
    }

    #[tokio::test]
    async fn test_leave_unknown_room_is_noop() {
        let registry = RoomRegistry::new(10);
        registry.leave("nowhere", Uuid::new_v4()).await;
        assert_eq!(registry.room_count().await, 0);
    }

    // =========================================================================
    // Presence
    // =========================================================================

    #[tokio::test]
    async fn test_presence_on_join_and_leave() {
        let registry = RoomRegistry::new(10);
        let (a, mut rx_a) = joined(&registry, "doc1", 8).await;
        drain(&mut rx_a);

        let (b, mut rx_b) = joined(&registry, "doc1", 8).await;
        assert_eq!(drain(&mut rx_a), vec![presence(2)]);
        assert_eq!(drain(&mut rx_b).last(), Some(&presence(2)));

        registry.leave("doc1", b).await;
        assert_eq!(drain(&mut rx_a), vec![presence(1)]);
        assert!(drain(&mut rx_b).is_empty());

        // Leaving twice changes nothing and announces nothing.
        registry.leave("doc1", b).await;
        assert!(drain(&mut rx_a).is_empty());

        registry.leave("doc1", a).await;
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_presence_stays_in_room() {
        let registry = RoomRegistry::new(10);
        let (_a, mut rx_a) = joined(&registry, "doc1", 8).await;
        drain(&mut rx_a);

        joined(&registry, "doc2", 8).await;
        assert!(drain(&mut rx_a).is_empty());
    }

    // =========================================================================
    // Broadcast
    // =========================================================================

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = RoomRegistry::new(10);
        let (a, mut rx_a) = joined(&registry, "doc1", 8).await;
        let (_b, mut rx_b) = joined(&registry, "doc1", 8).await;
        let (_c, mut rx_c) = joined(&registry, "doc1", 8).await;
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        let delta = json!({"op": "insert", "pos": 0, "text": "hi"});
        let report = registry
            .broadcast("doc1", ServerEvent::ReceiveChanges(delta.clone()), Some(a))
            .await;
        assert_eq!(report.delivered, 2);
        assert!(report.skipped.is_empty());

        assert_eq!(drain(&mut rx_b), vec![ServerEvent::ReceiveChanges(delta.clone())]);
        assert_eq!(drain(&mut rx_c), vec![ServerEvent::ReceiveChanges(delta)]);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_stays_in_room() {
        let registry = RoomRegistry::new(10);
        let (a, _rx_a) = joined(&registry, "doc1", 8).await;
        let (_b, mut rx_b) = joined(&registry, "doc2", 8).await;
        drain(&mut rx_b);

        let report = registry
            .broadcast("doc1", ServerEvent::ReceiveChanges(json!(1)), Some(a))
            .await;
        assert_eq!(report.delivered, 0);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_full_receiver_is_skipped() {
        let registry = RoomRegistry::new(10);
        let (a, _rx_a) = joined(&registry, "doc1", 8).await;
        let (_b, mut rx_b) = joined(&registry, "doc1", 8).await;
        // Room for its own load events and presence only.
        let (slow, mut rx_slow) = joined(&registry, "doc1", 3).await;
        drain(&mut rx_b);

        let report = registry
            .broadcast("doc1", ServerEvent::ReceiveChanges(json!(1)), Some(a))
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, vec![slow]);
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::ReceiveChanges(json!(1))]);

        // Once drained, the slow member receives again.
        assert_eq!(drain(&mut rx_slow).len(), 3);
        let report = registry
            .broadcast("doc1", ServerEvent::ReceiveChanges(json!(2)), Some(a))
            .await;
        assert_eq!(report.delivered, 2);
        assert_eq!(drain(&mut rx_slow), vec![ServerEvent::ReceiveChanges(json!(2))]);
    }

    #[tokio::test]
    async fn test_closed_receiver_does_not_fail_broadcast() {
        let registry = RoomRegistry::new(10);
        let (a, _rx_a) = joined(&registry, "doc1", 8).await;
        let (gone, rx_gone) = joined(&registry, "doc1", 8).await;
        let (_b, mut rx_b) = joined(&registry, "doc1", 8).await;
        drop(rx_gone);
        drain(&mut rx_b);

        let report = registry
            .broadcast("doc1", ServerEvent::ReceiveChanges(json!("x")), Some(a))
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, vec![gone]);
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::ReceiveChanges(json!("x"))]);
    }

    #[tokio::test]
    async fn test_departed_session_is_not_attempted() {
        let registry = RoomRegistry::new(10);
        let (a, _rx_a) = joined(&registry, "doc1", 8).await;
        let (b, rx_b) = joined(&registry, "doc1", 8).await;
        registry.leave("doc1", b).await;
        drop(rx_b);

        let report = registry
            .broadcast("doc1", ServerEvent::ReceiveChanges(json!("x")), Some(a))
            .await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_receivers_share_one_order() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (a, mut rx_a) = joined(&registry, "doc1", 256).await;
        let (b, mut rx_b) = joined(&registry, "doc1", 256).await;
        let (_c, mut rx_c) = joined(&registry, "doc1", 256).await;
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        // a and b send concurrently; c observes both streams.
        let send = |from: SessionId, tag: &'static str| {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    registry
                        .broadcast("doc1", ServerEvent::ReceiveChanges(json!(format!("{tag}{i}"))), Some(from))
                        .await;
                }
            })
        };
        let (ha, hb) = (send(a, "a"), send(b, "b"));
        ha.await.unwrap();
        hb.await.unwrap();

        let seen_by_c = drain(&mut rx_c);
        assert_eq!(seen_by_c.len(), 100);

        // a only sees b's events and b only sees a's, each in c's relative order.
        let is_from = |tag: &str, event: &ServerEvent| match event {
            ServerEvent::ReceiveChanges(v) => v.as_str().is_some_and(|s| s.starts_with(tag)),
            _ => false,
        };
        let c_from_b: Vec<_> = seen_by_c.iter().filter(|e| is_from("b", *e)).cloned().collect();
        let c_from_a: Vec<_> = seen_by_c.iter().filter(|e| is_from("a", *e)).cloned().collect();
        assert_eq!(drain(&mut rx_a), c_from_b);
        assert_eq!(drain(&mut rx_b), c_from_a);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshot_precedes_concurrent_changes() {
        let registry = Arc::new(RoomRegistry::new(10));
        let (editor, _rx_editor) = joined(&registry, "doc1", 8).await;

        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let spammer = tokio::spawn({
            let registry = registry.clone();
            let stop = stop.clone();
            async move {
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    registry
                        .broadcast("doc1", ServerEvent::ReceiveChanges(json!("edit")), Some(editor))
                        .await;
                    tokio::task::yield_now().await;
                }
            }
        });

        let mut early = 0;
        for _ in 0..500 {
            let (id, mut rx) = joined(&registry, "doc1", 64).await;
            if !matches!(rx.try_recv().as_deref(), Ok(ServerEvent::LoadDocument(_))) {
                early += 1;
            }
            registry.leave("doc1", id).await;
        }
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        spammer.await.unwrap();
        assert_eq!(early, 0);
    }

    // =========================================================================
    // Chat history
    // =========================================================================

    #[tokio::test]
    async fn test_chat_history_is_bounded() {
        let registry = RoomRegistry::new(2);
        let (a, _rx_a) = joined(&registry, "doc1", 8).await;
        for text in ["one", "two", "three"] {
            registry.broadcast_message("doc1", text.to_string(), Some(a)).await;
        }

        let (b, tx_b, mut rx_b) = member(8);
        let joined = registry.join("doc1", b, tx_b, json!("")).await.unwrap();
        let expected = vec!["two".to_string(), "three".to_string()];
        assert_eq!(joined.history, expected);
        assert_eq!(drain(&mut rx_b)[1], ServerEvent::LoadMessages(expected));
    }

    #[tokio::test]
    async fn test_chat_history_dropped_with_room() {
        let registry = RoomRegistry::new(10);
        let (a, tx_a, _rx_a) = member(8);
        registry.join("doc1", a, tx_a.clone(), json!("")).await.unwrap();
        registry.broadcast_message("doc1", "hello".to_string(), Some(a)).await;
        registry.leave("doc1", a).await;

        let joined = registry.join("doc1", a, tx_a, json!("")).await.unwrap();
        assert!(joined.history.is_empty());
    }
}
