//! Bounded connection groups with lossy fan-out

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;

use super::connection::Connection;
use super::types::{BroadcastReport, CloseReason, ConnectionId, HubError, MemberInfo, RoomInfo};
use crate::metrics::BroadcastMetrics;
use crate::websocket::{Frame, ServerFrame};

pub struct Room {
    id: String,
    kind: i32,
    capacity: usize,
    /// Admission counter; equals `members.len()` whenever no add/remove is in flight
    total: AtomicUsize,
    members: DashMap<ConnectionId, Arc<Connection>>,
}

impl Room {
    pub fn new(id: impl Into<String>, kind: i32, capacity: usize) -> Self {
        Self {
            id: id.into(),
            kind,
            capacity,
            total: AtomicUsize::new(0),
            members: DashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> i32 {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.members.contains_key(&connection_id)
    }

    pub(crate) fn add_client(&self, conn: &Arc<Connection>) -> Result<(), HubError> {
        // The vacant entry stays locked until the member is inserted
        let Entry::Vacant(slot) = self.members.entry(conn.id()) else {
            return Ok(());
        };

        let total = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        if total > self.capacity {
            self.total.fetch_sub(1, Ordering::SeqCst);
            return Err(HubError::RoomFull {
                room_id: self.id.clone(),
                capacity: self.capacity,
            });
        }

        slot.insert(conn.clone());
        tracing::debug!(room_id = %self.id, connection_id = %conn.id(), total, "Joined room");
        Ok(())
    }

    /// Remove a member; returns true if the room is now empty
    pub(crate) fn remove_client(&self, connection_id: ConnectionId) -> bool {
        if self.members.remove(&connection_id).is_some() {
            let left = self.total.fetch_sub(1, Ordering::SeqCst) - 1;
            tracing::debug!(room_id = %self.id, connection_id = %connection_id, total = left, "Left room");
            left == 0
        } else {
            self.is_empty()
        }
    }

    /// Serialize `frame` once and offer it to every member without waiting.
    ///
    /// Members whose mailbox is full (or already closed) miss this frame.
    pub fn broadcast_to_all(
        &self,
        sender: Option<ConnectionId>,
        frame: &ServerFrame,
    ) -> Result<BroadcastReport, serde_json::Error> {
        let encoded = frame.encode()?;
        Ok(self.broadcast_encoded(sender, encoded))
    }

    pub fn broadcast_encoded(&self, sender: Option<ConnectionId>, frame: Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for entry in self.members.iter() {
            match entry.value().try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    tracing::debug!(
                        room_id = %self.id,
                        connection_id = %entry.key(),
                        "Mailbox full, dropping broadcast frame"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    report.dropped += 1;
                }
            }
        }

        BroadcastMetrics::record(report.delivered, report.dropped);
        tracing::debug!(
            room_id = %self.id,
            sender = ?sender,
            delivered = report.delivered,
            dropped = report.dropped,
            "Room broadcast"
        );

        report
    }

    /// Close every member and empty the room
    pub fn close(&self) {
        let members: Vec<Arc<Connection>> =
            self.members.iter().map(|e| e.value().clone()).collect();
        self.members.clear();
        self.total.store(0, Ordering::SeqCst);

        for conn in members {
            conn.close(CloseReason::Shutdown);
        }
        tracing::debug!(room_id = %self.id, "Room closed");
    }

    pub fn members(&self) -> Vec<Arc<Connection>> {
        self.members.iter().map(|e| e.value().clone()).collect()
    }

    pub fn member_infos(&self) -> Vec<MemberInfo> {
        self.members.iter().map(|e| e.value().info()).collect()
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id.clone(),
            kind: self.kind,
            capacity: self.capacity,
            total: self.total(),
        }
    }
}
