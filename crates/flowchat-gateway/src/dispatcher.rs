use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use flowchat_types::events::GatewayEvent;

/// A logical broadcast group. Connections join by identifier and receive
/// every event addressed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    /// The shared chat room every viewer joins
    Global,
    /// Per-user notification room, keyed by the user's id
    User(Uuid),
}

/// Owns all live connections and their room memberships.
///
/// The registry is rebuilt from nothing on process restart: membership is
/// never persisted, and a reconnecting client starts with zero rooms until
/// it issues its join commands again.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Live connections: conn_id -> outbound event channel
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>,

    /// Room membership: room -> set of conn_ids
    rooms: RwLock<HashMap<Room, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                connections: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a new live connection. Returns (conn_id, receiver); the
    /// connection starts with no room memberships.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Add a connection to a room. Idempotent.
    pub async fn join(&self, conn_id: Uuid, room: Room) {
        self.inner
            .rooms
            .write()
            .await
            .entry(room)
            .or_default()
            .insert(conn_id);
    }

    /// Remove a connection from every room it joined. Invoked on disconnect;
    /// no persisted state is affected.
    pub async fn leave_all(&self, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    /// Tear down a connection: drop all memberships, then the channel.
    pub async fn disconnect(&self, conn_id: Uuid) {
        self.leave_all(conn_id).await;
        self.inner.connections.write().await.remove(&conn_id);
    }

    /// Deliver an event to every member of `room`, except the optionally
    /// excluded connection (used to avoid echoing a sender's own action).
    pub async fn broadcast(&self, room: Room, event: GatewayEvent, exclude: Option<Uuid>) {
        let members = {
            let rooms = self.inner.rooms.read().await;
            match rooms.get(&room) {
                Some(members) => members.clone(),
                None => return,
            }
        };

        let connections = self.inner.connections.read().await;
        for conn_id in members {
            if Some(conn_id) == exclude {
                continue;
            }
            if let Some(tx) = connections.get(&conn_id) {
                // a send error means the connection is mid-teardown
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Deliver an event to the per-user notification room.
    pub async fn notify_user(&self, user_id: Uuid, event: GatewayEvent) {
        self.broadcast(Room::User(user_id), event, None).await;
    }

    /// Current member count of a room.
    pub async fn room_size(&self, room: Room) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&room)
            .map_or(0, |members| members.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_event() -> GatewayEvent {
        GatewayEvent::MessageDelete { id: Uuid::nil() }
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let dispatcher = Dispatcher::new();
        let (conn_id, _rx) = dispatcher.register().await;

        dispatcher.join(conn_id, Room::Global).await;
        dispatcher.join(conn_id, Room::Global).await;

        assert_eq!(dispatcher.room_size(Room::Global).await, 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_room_members_only() {
        let dispatcher = Dispatcher::new();
        let (in_room, mut rx_in) = dispatcher.register().await;
        let (_outside, mut rx_out) = dispatcher.register().await;

        dispatcher.join(in_room, Room::Global).await;
        dispatcher
            .broadcast(Room::Global, probe_event(), None)
            .await;

        assert!(rx_in.try_recv().is_ok());
        assert!(rx_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_honors_exclusion() {
        let dispatcher = Dispatcher::new();
        let (a, mut rx_a) = dispatcher.register().await;
        let (b, mut rx_b) = dispatcher.register().await;

        dispatcher.join(a, Room::Global).await;
        dispatcher.join(b, Room::Global).await;
        dispatcher
            .broadcast(Room::Global, probe_event(), Some(a))
            .await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn notify_user_targets_the_personal_room() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (conn, mut rx) = dispatcher.register().await;
        let (_other_conn, mut other_rx) = dispatcher.register().await;

        dispatcher.join(conn, Room::User(user)).await;
        dispatcher.notify_user(user, probe_event()).await;
        dispatcher.notify_user(Uuid::new_v4(), probe_event()).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_discards_every_membership() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (conn, _rx) = dispatcher.register().await;

        dispatcher.join(conn, Room::Global).await;
        dispatcher.join(conn, Room::User(user)).await;
        dispatcher.disconnect(conn).await;

        assert_eq!(dispatcher.room_size(Room::Global).await, 0);
        assert_eq!(dispatcher.room_size(Room::User(user)).await, 0);
    }
}
