//! A single lobby session and its derived state

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::registry::Hub;
use super::types::{CloseReason, ConnectionId, ConnectionState, MemberInfo};
use crate::auth::Identity;
use crate::metrics::ConnectionMetrics;
use crate::websocket::Frame;

/// Receiving half of a connection's outbound mailbox, drained by the write loop
pub type Mailbox = mpsc::Receiver<Frame>;

pub struct Connection {
    id: ConnectionId,
    state: AtomicU8,
    /// Mirrors `state` for tasks that need to await a transition
    state_tx: watch::Sender<ConnectionState>,
    /// Set once the read/write loops have taken ownership of the transport
    attached: AtomicBool,
    close_reason: OnceLock<CloseReason>,
    identity: RwLock<Option<Identity>>,
    room: RwLock<Option<String>>,
    /// `None` once the connection starts closing
    sender: Mutex<Option<mpsc::Sender<Frame>>>,
    last_active: AtomicI64,
    missed_heartbeats: AtomicU32,
    created_at: DateTime<Utc>,
    hub: Weak<Hub>,
}

impl Connection {
    /// Create a connection in the `Connecting` state together with its mailbox.
    ///
    /// `hub` may be empty for connections that are never registered.
    pub fn new(hub: Weak<Hub>, mailbox_capacity: usize) -> (Arc<Self>, Mailbox) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let now = Utc::now();

        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            state_tx,
            attached: AtomicBool::new(false),
            close_reason: OnceLock::new(),
            identity: RwLock::new(None),
            room: RwLock::new(None),
            sender: Mutex::new(Some(tx)),
            last_active: AtomicI64::new(now.timestamp()),
            missed_heartbeats: AtomicU32::new(0),
            created_at: now,
            hub,
        });

        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    pub fn room_id(&self) -> Option<String> {
        self.room.read().clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_active.load(Ordering::Relaxed), 0)
            .unwrap_or(self.created_at)
    }

    pub fn missed_heartbeats(&self) -> u32 {
        self.missed_heartbeats.load(Ordering::Relaxed)
    }

    /// Record inbound activity from the peer
    pub fn touch(&self) {
        self.last_active
            .store(Utc::now().timestamp(), Ordering::Relaxed);
        self.missed_heartbeats.store(0, Ordering::Relaxed);
    }

    /// Count a ping that has not been answered yet; returns the new count
    pub fn record_ping(&self) -> u32 {
        self.missed_heartbeats.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Move from `from` to `to`; fails if the connection is not in `from`
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let ok = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if ok {
            self.publish(to);
        }
        ok
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if state > *current {
                *current = state;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn mark_upgrading(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Upgrading)
    }

    pub(crate) fn mark_authenticating(&self) -> bool {
        self.transition(ConnectionState::Upgrading, ConnectionState::Authenticating)
    }

    /// Attach the authenticated identity and promote the session to `Active`.
    ///
    /// Returns false if the connection is already terminating.
    pub fn authenticate(&self, identity: Identity) -> bool {
        if self.state().is_terminating() {
            return false;
        }
        *self.identity.write() = Some(identity);
        self.transition(ConnectionState::Authenticating, ConnectionState::Active)
            || self.state() == ConnectionState::Active
    }

    pub(crate) fn set_room(&self, room_id: Option<String>) {
        *self.room.write() = room_id;
    }

    pub(crate) fn take_room(&self) -> Option<String> {
        self.room.write().take()
    }

    /// Enqueue without waiting; used for fan-out where a full mailbox drops the frame
    pub fn try_send(&self, frame: Frame) -> Result<(), mpsc::error::TrySendError<Frame>> {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.try_send(frame),
            None => Err(mpsc::error::TrySendError::Closed(frame)),
        }
    }

    /// Enqueue, waiting for mailbox space
    pub async fn send(&self, frame: Frame) -> Result<(), mpsc::error::SendError<Frame>> {
        let tx = self.sender.lock().clone();
        match tx {
            Some(tx) => tx.send(frame).await,
            None => Err(mpsc::error::SendError(frame)),
        }
    }

    /// Begin tearing the connection down.
    ///
    /// Only the first call has an effect: it records the reason, closes the
    /// mailbox (which stops the write loop and closes the transport) and wakes
    /// the read loop. Returns whether this call initiated the close.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if ConnectionState::from_u8(current).is_terminating() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let _ = self.close_reason.set(reason);
        tracing::info!(connection_id = %self.id, reason = %reason, "Connection closing");

        drop(self.sender.lock().take());
        self.publish(ConnectionState::Closing);

        if !self.attached.load(Ordering::SeqCst) {
            // No loops own this connection, nobody else will finish it
            self.finish();
        }
        true
    }

    /// Claim the transport for the read/write loops.
    ///
    /// Returns false if the loops must not start (already claimed or closing).
    pub(crate) fn attach(&self) -> bool {
        if self.attached.swap(true, Ordering::SeqCst) {
            return false;
        }
        !self.state().is_terminating()
    }

    /// `Closing -> Closed`: deregister from the room and the hub.
    ///
    /// Runs at most once no matter how many paths reach it.
    pub(crate) fn finish(&self) {
        if !self.transition(ConnectionState::Closing, ConnectionState::Closed) {
            return;
        }

        if let Some(hub) = self.hub.upgrade() {
            hub.leave_room(self);
            hub.remove_client(self.id);
        }

        let reason = self.close_reason().unwrap_or(CloseReason::Unregister);
        let duration = Utc::now()
            .signed_duration_since(self.created_at)
            .num_milliseconds() as f64
            / 1000.0;
        ConnectionMetrics::record_closed(reason.as_str(), duration);

        tracing::info!(
            connection_id = %self.id,
            reason = %reason,
            duration_secs = duration,
            "Connection closed"
        );
    }

    /// Resolve once the connection reaches `Closed`
    pub async fn closed(&self) {
        let mut rx = self.state_tx.subscribe();
        loop {
            if *rx.borrow_and_update() == ConnectionState::Closed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn info(&self) -> MemberInfo {
        let identity = self.identity();
        MemberInfo {
            conn_id: self.id,
            state: self.state(),
            member_id: identity.as_ref().map(|i| i.id),
            account: identity.map(|i| i.account),
            created_at: self.created_at,
            last_active: self.last_active(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("room", &self.room_id())
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn detached() -> (Arc<Connection>, Mailbox) {
        Connection::new(Weak::new(), 4)
    }

    fn alice() -> Identity {
        Identity {
            id: 1,
            account: "alice".to_string(),
            display_name: "Alice".to_string(),
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| detached().0.id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_states_advance_in_order() {
        let (conn, _rx) = detached();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.mark_authenticating());
        assert!(conn.mark_upgrading());
        assert!(conn.mark_authenticating());
        assert!(conn.authenticate(alice()));
        assert_eq!(conn.state(), ConnectionState::Active);
        assert_eq!(conn.identity(), Some(alice()));
    }

    #[test]
    fn test_closed_connection_cannot_be_resurrected() {
        let (conn, _rx) = detached();
        assert!(conn.close(CloseReason::Unregister));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.mark_upgrading());
        assert!(!conn.authenticate(alice()));
        assert!(conn.identity().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (conn, _rx) = detached();
        assert!(conn.close(CloseReason::HeartbeatTimeout));
        assert!(!conn.close(CloseReason::Shutdown));
        assert_eq!(conn.close_reason(), Some(CloseReason::HeartbeatTimeout));
    }

    #[test]
    fn test_concurrent_close_has_single_winner() {
        let (conn, _rx) = detached();
        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| conn.close(CloseReason::Shutdown)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });
        assert_eq!(winners, 1);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_mailbox_closes_with_connection() {
        let (conn, mut rx) = detached();
        conn.try_send(Frame::from("first")).unwrap();
        conn.close(CloseReason::Unregister);

        assert!(matches!(
            conn.try_send(Frame::from("late")),
            Err(mpsc::error::TrySendError::Closed(_))
        ));
        assert!(conn.send(Frame::from("late")).await.is_err());

        // Frames queued before the close still drain, then the mailbox ends
        assert_eq!(rx.recv().await.unwrap().as_str(), "first");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_mailbox_rejects_try_send() {
        let (conn, _rx) = Connection::new(Weak::new(), 1);
        conn.try_send(Frame::from("one")).unwrap();
        assert!(matches!(
            conn.try_send(Frame::from("two")),
            Err(mpsc::error::TrySendError::Full(_))
        ));
    }

    #[tokio::test]
    async fn test_attached_connection_waits_for_finish() {
        let (conn, _rx) = detached();
        assert!(conn.mark_upgrading());
        assert!(conn.attach());
        conn.close(CloseReason::Shutdown);
        assert_eq!(conn.state(), ConnectionState::Closing);

        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.closed().await })
        };
        conn.finish();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() should resolve")
            .unwrap();
        assert!(conn.is_closed());
    }

    #[test]
    fn test_attach_refused_after_close() {
        let (conn, _rx) = detached();
        conn.close(CloseReason::Shutdown);
        assert!(!conn.attach());
    }

    #[test]
    fn test_touch_resets_missed_heartbeats() {
        let (conn, _rx) = detached();
        assert_eq!(conn.record_ping(), 1);
        assert_eq!(conn.record_ping(), 2);
        conn.touch();
        assert_eq!(conn.missed_heartbeats(), 0);
    }
}
