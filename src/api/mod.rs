//! API layer - HTTP endpoint handlers organized by concern.

mod broadcast;
mod health;
mod home;
mod metrics;
mod routes;
mod stats;

pub use broadcast::{broadcast_to_room, list_rooms, room_members, BroadcastRequest, BroadcastResponse};
pub use health::{health, HealthResponse};
pub use home::serve_home;
pub use metrics::prometheus_metrics;
pub use routes::{api_routes, lobby_routes};
pub use stats::{lobby_stats, JsonResult};
