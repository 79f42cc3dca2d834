mod handler;
mod message;
mod session;

pub use handler::{ws_handler, UpgradeQuery};
pub use message::{
    AuthData, AuthResponse, ClientRequest, DecodeError, Envelope, ErrorCode, Frame, ServerFrame,
    PROTOCOL_ACK, PROTOCOL_AUTH, PROTOCOL_KEEPALIVE,
};
pub use session::{run_session, SessionConfig};
