//! Connection hub: the registry of live connections and the rooms they share.
//!
//! Ownership runs one way. The [`Hub`] owns every [`Connection`] and every
//! [`Room`]; a room only holds handles to connections the hub already owns,
//! and a connection only remembers the id of its room. A connection reaches
//! back to its hub through a weak reference so it can deregister itself when
//! it closes.

mod connection;
mod registry;
mod room;
mod types;

pub use connection::{Connection, Mailbox};
pub use registry::{Hub, HubLimits};
pub use room::Room;
pub use types::{
    BroadcastReport, CloseReason, ConnectionId, ConnectionState, HubError, HubStats, MemberInfo,
    RoomInfo,
};
