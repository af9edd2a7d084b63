use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::SendMessage;

pub type ConnectionId = Uuid;

/// Outbound side of one live connection.
///
/// Events are queued on an unbounded channel drained by the connection's writer task, so
/// sending never waits on the socket and per-connection order is the order of `send` calls.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Authenticated user behind the connection
    pub user_id: i64,
    tx: UnboundedSender<SendMessage>,
}

impl ConnectionHandle {
    pub fn new(user_id: i64) -> (Self, UnboundedReceiver<SendMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self { id: Uuid::new_v4(), user_id, tx };
        (handle, rx)
    }

    /// Queue an event for this connection. Returns `false` when the connection is gone.
    pub fn send(&self, event: SendMessage) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub rooms: u32,
    pub connections: u32,
}

/// Fan-out of events to the connections subscribed to a document.
///
/// The in-process [`LocalRooms`] only reaches connections of this process; a deployment
/// with several processes needs an implementation that relays between them.
pub trait RoomBroadcaster: Send + Sync {
    fn subscribe(&self, document_id: i64, connection: &ConnectionHandle);

    /// Returns `true` when the connection was a member of the room
    fn unsubscribe(&self, document_id: i64, connection_id: ConnectionId) -> bool;

    /// Remove a connection from every room, returning the documents it was subscribed to
    fn unsubscribe_all(&self, connection_id: ConnectionId) -> Vec<i64>;

    /// Deliver `event` to every member except `exclude`. Returns the number of deliveries.
    /// Delivery is best-effort: closed connections are skipped and pruned.
    fn publish(&self, document_id: i64, event: &SendMessage, exclude: Option<ConnectionId>) -> usize;

    fn is_member(&self, document_id: i64, connection_id: ConnectionId) -> bool;

    /// Whether any connection of `user_id` other than `excluding` is in the room
    fn has_user(&self, document_id: i64, user_id: i64, excluding: Option<ConnectionId>) -> bool;

    fn stats(&self) -> RoomStats;
}

type RoomMap = HashMap<i64, HashMap<ConnectionId, ConnectionHandle>>;

/// Room registry for the connections of this process
#[derive(Default)]
pub struct LocalRooms {
    rooms: RwLock<RoomMap>,
}

impl LocalRooms {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RoomMap> {
        self.rooms.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RoomMap> {
        self.rooms.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prune(&self, document_id: i64, dead: &[ConnectionId]) {
        let mut rooms = self.write();
        if let Some(members) = rooms.get_mut(&document_id) {
            for id in dead {
                members.remove(id);
            }
            if members.is_empty() {
                rooms.remove(&document_id);
            }
        }
        debug!("Pruned {} closed connections from room {}", dead.len(), document_id);
    }
}

impl RoomBroadcaster for LocalRooms {
    fn subscribe(&self, document_id: i64, connection: &ConnectionHandle) {
        self.write()
            .entry(document_id)
            .or_default()
            .insert(connection.id, connection.clone());
        debug!("Connection {} subscribed to room {}", connection.id, document_id);
    }

    fn unsubscribe(&self, document_id: i64, connection_id: ConnectionId) -> bool {
        let mut rooms = self.write();
        let Some(members) = rooms.get_mut(&document_id) else {
            return false;
        };
        let removed = members.remove(&connection_id).is_some();
        if members.is_empty() {
            rooms.remove(&document_id);
        }
        removed
    }

    fn unsubscribe_all(&self, connection_id: ConnectionId) -> Vec<i64> {
        let mut rooms = self.write();
        let mut left = Vec::new();
        rooms.retain(|document_id, members| {
            if members.remove(&connection_id).is_some() {
                left.push(*document_id);
            }
            !members.is_empty()
        });
        if !left.is_empty() {
            info!("Connection {} removed from {} rooms", connection_id, left.len());
        }
        left
    }

    fn publish(&self, document_id: i64, event: &SendMessage, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let rooms = self.read();
            let Some(members) = rooms.get(&document_id) else {
                return 0;
            };
            for (id, connection) in members {
                if Some(*id) == exclude {
                    continue;
                }
                if connection.send(event.clone()) {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            self.prune(document_id, &dead);
        }
        delivered
    }

    fn is_member(&self, document_id: i64, connection_id: ConnectionId) -> bool {
        self.read()
            .get(&document_id)
            .is_some_and(|members| members.contains_key(&connection_id))
    }

    fn has_user(&self, document_id: i64, user_id: i64, excluding: Option<ConnectionId>) -> bool {
        self.read().get(&document_id).is_some_and(|members| {
            members
                .values()
                .any(|c| c.user_id == user_id && Some(c.id) != excluding && !c.is_closed())
        })
    }

    fn stats(&self) -> RoomStats {
        let rooms = self.read();
        RoomStats {
            rooms: rooms.len() as u32,
            connections: rooms.values().map(|members| members.len() as u32).sum(),
        }
    }
}
