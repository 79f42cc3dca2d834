//! Process-wide registry of connections and rooms

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;

use super::connection::{Connection, Mailbox};
use super::room::Room;
use super::types::{CloseReason, ConnectionId, HubError, HubStats, MemberInfo, RoomInfo};
use crate::config::HubConfig;
use crate::metrics::ConnectionMetrics;

/// Capacity limits enforced by the hub
#[derive(Debug, Clone, Copy)]
pub struct HubLimits {
    pub max_connections: usize,
    pub room_capacity: usize,
    pub mailbox_capacity: usize,
}

impl Default for HubLimits {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            room_capacity: 1000,
            mailbox_capacity: 256,
        }
    }
}

impl HubLimits {
    pub fn from_config(hub: &HubConfig, mailbox_capacity: usize) -> Self {
        Self {
            max_connections: hub.max_connections,
            room_capacity: hub.room_capacity,
            mailbox_capacity,
        }
    }
}

/// Owns every live connection and every room
pub struct Hub {
    limits: HubLimits,
    /// Admission counter; equals `clients.len()` whenever no add/remove is in flight
    total: AtomicUsize,
    clients: DashMap<ConnectionId, Arc<Connection>>,
    rooms: DashMap<String, Arc<Room>>,
    shutting_down: AtomicBool,
}

impl Hub {
    pub fn new(limits: HubLimits) -> Arc<Self> {
        Arc::new(Self {
            limits,
            total: AtomicUsize::new(0),
            clients: DashMap::new(),
            rooms: DashMap::new(),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn limits(&self) -> HubLimits {
        self.limits
    }

    /// Create a connection bound to this hub. It is not registered yet.
    pub fn create_connection(self: &Arc<Self>) -> (Arc<Connection>, Mailbox) {
        Connection::new(Arc::downgrade(self), self.limits.mailbox_capacity)
    }

    /// Admit and register a connection
    pub fn add_client(&self, conn: &Arc<Connection>) -> Result<(), HubError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(HubError::ShuttingDown);
        }

        let total = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        if total > self.limits.max_connections {
            self.total.fetch_sub(1, Ordering::SeqCst);
            ConnectionMetrics::record_rejected("hub");
            return Err(HubError::ChannelFull {
                max: self.limits.max_connections,
            });
        }

        self.clients.insert(conn.id(), conn.clone());

        // `close` may have taken its snapshot between the check above and the insert
        if self.shutting_down.load(Ordering::SeqCst) {
            self.remove_client(conn.id());
            return Err(HubError::ShuttingDown);
        }

        conn.mark_upgrading();
        ConnectionMetrics::record_opened();
        tracing::debug!(connection_id = %conn.id(), total, "Connection registered");
        Ok(())
    }

    /// Deregister a connection; a no-op for unknown ids
    pub fn remove_client(&self, connection_id: ConnectionId) -> bool {
        if self.clients.remove(&connection_id).is_some() {
            let left = self.total.fetch_sub(1, Ordering::SeqCst) - 1;
            tracing::debug!(connection_id = %connection_id, total = left, "Connection unregistered");
            true
        } else {
            false
        }
    }

    pub fn get_or_create_room(&self, room_id: &str, kind: i32) -> Arc<Room> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                tracing::info!(room_id = %room_id, kind, "Room created");
                Arc::new(Room::new(room_id, kind, self.limits.room_capacity))
            })
            .clone()
    }

    /// Put a registered connection into a room, creating the room on demand.
    ///
    /// A connection sits in at most one room; joining another leaves the current one.
    pub fn join_room(
        &self,
        conn: &Arc<Connection>,
        room_id: &str,
        kind: i32,
    ) -> Result<Arc<Room>, HubError> {
        if !self.clients.contains_key(&conn.id()) {
            return Err(HubError::NotRegistered(conn.id()));
        }

        match conn.room_id() {
            Some(current) if current == room_id => {
                if let Some(room) = self.get_room(room_id) {
                    return Ok(room);
                }
            }
            Some(_) => self.leave_room(conn),
            None => {}
        }

        // Holding the room-map entry serializes this join with the
        // empty-room check in `leave_room`
        let room = {
            let entry = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
                tracing::info!(room_id = %room_id, kind, "Room created");
                Arc::new(Room::new(room_id, kind, self.limits.room_capacity))
            });
            if let Err(e) = entry.add_client(conn) {
                ConnectionMetrics::record_rejected("room");
                return Err(e);
            }
            entry.clone()
        };
        conn.set_room(Some(room_id.to_string()));

        // Lost a race with close: undo so the membership stays symmetric
        if conn.state().is_terminating() {
            self.leave_room(conn);
        }

        Ok(room)
    }

    /// Take a connection out of its room; drops the room once it is empty
    pub fn leave_room(&self, conn: &Connection) {
        let Some(room_id) = conn.take_room() else {
            return;
        };

        let Some(room) = self.get_room(&room_id) else {
            return;
        };
        if room.remove_client(conn.id()) {
            let removed = self
                .rooms
                .remove_if(&room_id, |_, r| Arc::ptr_eq(r, &room) && r.is_empty());
            if removed.is_some() {
                tracing::info!(room_id = %room_id, "Room removed");
            }
        }
    }

    pub fn get_connection(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        self.clients.get(&connection_id).map(|c| c.clone())
    }

    pub fn get_room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_directory(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self.rooms.iter().map(|r| r.value().info()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    pub fn room_members(&self, room_id: &str) -> Option<Vec<MemberInfo>> {
        self.get_room(room_id).map(|r| r.member_infos())
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            total_connections: self.connection_count(),
            max_connections: self.limits.max_connections,
            total_rooms: self.room_count(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Close every connection and room, then wait for all connection loops to exit
    pub async fn close(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let connections: Vec<Arc<Connection>> =
            self.clients.iter().map(|c| c.value().clone()).collect();
        tracing::info!(connections = connections.len(), rooms = self.room_count(), "Closing hub");

        for conn in &connections {
            conn.close(CloseReason::Shutdown);
        }

        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|r| r.value().clone()).collect();
        for room in &rooms {
            room.close();
        }
        self.rooms.clear();

        join_all(connections.iter().map(|c| c.closed())).await;

        tracing::info!(remaining = self.connection_count(), "Hub closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ConnectionState;

    fn hub(max_connections: usize, room_capacity: usize) -> Arc<Hub> {
        Hub::new(HubLimits {
            max_connections,
            room_capacity,
            mailbox_capacity: 4,
        })
    }

    #[test]
    fn test_admission_bound() {
        let hub = hub(1, 10);
        let (a, _ra) = hub.create_connection();
        let (b, _rb) = hub.create_connection();

        tokio_test::assert_ok!(hub.add_client(&a));
        assert_eq!(a.state(), ConnectionState::Upgrading);
        assert_eq!(hub.add_client(&b), Err(HubError::ChannelFull { max: 1 }));
        assert_eq!(hub.connection_count(), 1);
        assert!(hub.get_connection(b.id()).is_none());

        // The rejected attempt did not consume a slot
        a.close(CloseReason::Unregister);
        assert_eq!(hub.connection_count(), 0);
        tokio_test::assert_ok!(hub.add_client(&b));
    }

    #[test]
    fn test_remove_client_is_idempotent() {
        let hub = hub(10, 10);
        let (a, _ra) = hub.create_connection();
        hub.add_client(&a).unwrap();
        assert!(hub.remove_client(a.id()));
        assert!(!hub.remove_client(a.id()));
        assert_eq!(hub.stats().total_connections, 0);
    }

    #[test]
    fn test_get_or_create_room_is_idempotent() {
        let hub = hub(10, 10);
        let r1 = hub.get_or_create_room("table-1", 1);
        let r2 = hub.get_or_create_room("table-1", 0);
        assert!(Arc::ptr_eq(&r1, &r2));
        assert_eq!(r2.kind(), 1);
        assert_eq!(hub.room_count(), 1);
    }

    #[test]
    fn test_concurrent_get_or_create_yields_one_room() {
        let hub = hub(10, 10);
        let rooms: Vec<Arc<Room>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| hub.get_or_create_room("shared", 0)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(rooms.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_join_and_leave_keep_membership_symmetric() {
        let hub = hub(10, 10);
        let (a, _ra) = hub.create_connection();
        hub.add_client(&a).unwrap();

        let room = hub.join_room(&a, "table-1", 0).unwrap();
        assert_eq!(a.room_id().as_deref(), Some("table-1"));
        assert!(room.contains(a.id()));

        hub.leave_room(&a);
        assert!(a.room_id().is_none());
        assert!(!room.contains(a.id()));
        // Last member gone, room collected
        assert!(hub.get_room("table-1").is_none());
    }

    #[test]
    fn test_switching_rooms_leaves_previous() {
        let hub = hub(10, 10);
        let (a, _ra) = hub.create_connection();
        let (b, _rb) = hub.create_connection();
        hub.add_client(&a).unwrap();
        hub.add_client(&b).unwrap();

        let first = hub.join_room(&a, "table-1", 0).unwrap();
        hub.join_room(&b, "table-1", 0).unwrap();
        hub.join_room(&a, "table-2", 0).unwrap();

        assert!(!first.contains(a.id()));
        assert_eq!(first.total(), 1);
        assert_eq!(hub.room_count(), 2);
    }

    #[test]
    fn test_join_requires_registration() {
        let hub = hub(10, 10);
        let (a, _ra) = hub.create_connection();
        assert!(matches!(
            hub.join_room(&a, "table-1", 0),
            Err(HubError::NotRegistered(id)) if id == a.id()
        ));
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_room_full_rejects_join() {
        let hub = hub(10, 1);
        let (a, _ra) = hub.create_connection();
        let (b, _rb) = hub.create_connection();
        hub.add_client(&a).unwrap();
        hub.add_client(&b).unwrap();

        hub.join_room(&a, "table-1", 0).unwrap();
        assert!(matches!(
            hub.join_room(&b, "table-1", 0),
            Err(HubError::RoomFull { .. })
        ));
        assert!(b.room_id().is_none());
    }

    #[test]
    fn test_closing_connection_leaves_room_and_registry() {
        let hub = hub(10, 10);
        let (a, _ra) = hub.create_connection();
        let (b, _rb) = hub.create_connection();
        hub.add_client(&a).unwrap();
        hub.add_client(&b).unwrap();
        let room = hub.join_room(&a, "table-1", 0).unwrap();
        hub.join_room(&b, "table-1", 0).unwrap();

        a.close(CloseReason::ReadError);
        assert!(a.is_closed());
        assert!(hub.get_connection(a.id()).is_none());
        assert!(!room.contains(a.id()));
        assert_eq!(room.total(), 1);

        // Every remaining member is still registered
        for member in room.members() {
            assert!(hub.get_connection(member.id()).is_some());
        }
    }

    #[test]
    fn test_prepared_room_keeps_membership_symmetric_on_close() {
        let hub = hub(10, 10);
        let (a, _ra) = hub.create_connection();
        hub.add_client(&a).unwrap();

        let room = hub.get_or_create_room("table-1", 0);
        let joined = hub.join_room(&a, "table-1", 0).unwrap();
        assert!(Arc::ptr_eq(&room, &joined));
        assert_eq!(a.room_id().as_deref(), Some("table-1"));

        a.close(CloseReason::PeerClosed);
        assert!(!room.contains(a.id()));
        assert_eq!(room.total(), 0);
        assert!(hub.get_connection(a.id()).is_none());
    }

    #[tokio::test]
    async fn test_add_racing_close_is_not_left_registered() {
        let hub = hub(1000, 10);
        let adders: Vec<_> = (0..64)
            .map(|_| {
                let hub = hub.clone();
                tokio::task::spawn_blocking(move || {
                    let (conn, mailbox) = hub.create_connection();
                    let admitted = hub.add_client(&conn).is_ok();
                    (conn, mailbox, admitted)
                })
            })
            .collect();
        hub.close().await;

        let mut conns = Vec::new();
        for adder in adders {
            conns.push(adder.await.unwrap());
        }
        // Admitted before the snapshot: closed by `close`. After it: rolled back.
        assert_eq!(hub.connection_count(), 0);
        for (conn, _, admitted) in &conns {
            if *admitted {
                assert!(conn.state().is_terminating());
            }
        }

        let (late, _rx) = hub.create_connection();
        assert_eq!(hub.add_client(&late), Err(HubError::ShuttingDown));
        assert!(hub.get_connection(late.id()).is_none());
    }

    #[tokio::test]
    async fn test_close_empties_everything() {
        let hub = hub(10, 10);
        let mut conns = Vec::new();
        for i in 0..5 {
            let (c, rx) = hub.create_connection();
            hub.add_client(&c).unwrap();
            hub.join_room(&c, if i % 2 == 0 { "even" } else { "odd" }, 0)
                .unwrap();
            conns.push((c, rx));
        }
        let even = hub.get_room("even").unwrap();
        let odd = hub.get_room("odd").unwrap();

        hub.close().await;

        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.room_count(), 0);
        assert_eq!(even.total(), 0);
        assert_eq!(odd.total(), 0);
        for (c, _) in &conns {
            assert_eq!(c.state(), ConnectionState::Closed);
        }

        let (late, _rx) = hub.create_connection();
        assert_eq!(hub.add_client(&late), Err(HubError::ShuttingDown));
    }
}
