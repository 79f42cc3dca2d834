//! Envelope codec for the lobby protocol.
//!
//! Every frame is a JSON object `{"protocol": <int>, "data": <any>}`, except
//! error frames which are a bare `{"code": <int>, "err_msg": <string>}`.

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::auth::Identity;

pub const PROTOCOL_AUTH: i64 = 0;
pub const PROTOCOL_ACK: i64 = 115;
pub const PROTOCOL_KEEPALIVE: i64 = 999;

/// Serialized frame as it sits in a connection's mailbox
pub type Frame = Utf8Bytes;

/// Raw inbound envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Envelope {
    pub protocol: i64,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthData {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
}

/// Decoded client request
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Authenticate(AuthData),
    Acknowledge,
    Unknown { protocol: i64, raw: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("malformed payload for protocol {protocol}: {source}")]
    Payload {
        protocol: i64,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientRequest {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::Envelope)?;

        match envelope.protocol {
            PROTOCOL_AUTH => {
                let data = match envelope.data {
                    Value::Null => AuthData::default(),
                    other => serde_json::from_value(other).map_err(|source| {
                        DecodeError::Payload {
                            protocol: PROTOCOL_AUTH,
                            source,
                        }
                    })?,
                };
                Ok(ClientRequest::Authenticate(data))
            }
            PROTOCOL_ACK => Ok(ClientRequest::Acknowledge),
            protocol => Ok(ClientRequest::Unknown {
                protocol,
                raw: text.to_string(),
            }),
        }
    }

    pub fn protocol(&self) -> i64 {
        match self {
            ClientRequest::Authenticate(_) => PROTOCOL_AUTH,
            ClientRequest::Acknowledge => PROTOCOL_ACK,
            ClientRequest::Unknown { protocol, .. } => *protocol,
        }
    }
}

/// Payload of the protocol-0 reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(rename = "memberID")]
    pub member_id: i64,
    pub account: String,
    pub user_name: String,
    pub sid: String,
    pub b_ok: bool,
    pub b_valid_password: bool,
}

impl AuthResponse {
    pub fn success(identity: &Identity, sid: String) -> Self {
        Self {
            member_id: identity.id,
            account: identity.account.clone(),
            user_name: identity.display_name.clone(),
            sid,
            b_ok: true,
            b_valid_password: true,
        }
    }

    pub fn failure() -> Self {
        Self::default()
    }
}

/// Stable numeric codes carried by error frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    DataFormat,
    InternalServerError,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::DataFormat => 4006,
            ErrorCode::InternalServerError => 5001,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::DataFormat => "data format err",
            ErrorCode::InternalServerError => "internal server error",
        }
    }
}

#[derive(Serialize)]
struct OutEnvelope<'a, T: Serialize> {
    protocol: i64,
    data: &'a T,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: i64,
    err_msg: &'a str,
}

#[derive(Serialize)]
struct Empty {}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Auth(AuthResponse),
    Ack,
    Keepalive,
    Error(ErrorCode),
    /// Arbitrary envelope, used for room broadcasts
    Push { protocol: i64, data: Value },
}

impl ServerFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            ServerFrame::Auth(resp) => serde_json::to_string(&OutEnvelope {
                protocol: PROTOCOL_AUTH,
                data: resp,
            }),
            ServerFrame::Ack => serde_json::to_string(&OutEnvelope {
                protocol: PROTOCOL_ACK,
                data: &Empty {},
            }),
            ServerFrame::Keepalive => serde_json::to_string(&OutEnvelope {
                protocol: PROTOCOL_KEEPALIVE,
                data: &Empty {},
            }),
            ServerFrame::Error(code) => serde_json::to_string(&ErrorBody {
                code: code.code(),
                err_msg: code.message(),
            }),
            ServerFrame::Push { protocol, data } => serde_json::to_string(&OutEnvelope {
                protocol: *protocol,
                data,
            }),
        }
    }

    pub fn encode(&self) -> Result<Frame, serde_json::Error> {
        self.to_json().map(Frame::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_auth_request() {
        let req = ClientRequest::decode(
            r#"{"protocol":0,"data":{"account":"alice","password":"secret"}}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            ClientRequest::Authenticate(AuthData {
                account: "alice".to_string(),
                password: "secret".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_auth_with_null_data_is_empty() {
        let req = ClientRequest::decode(r#"{"protocol":0,"data":null}"#).unwrap();
        assert_eq!(req, ClientRequest::Authenticate(AuthData::default()));
    }

    #[test]
    fn test_decode_auth_with_wrong_payload_shape() {
        let err = ClientRequest::decode(r#"{"protocol":0,"data":"alice"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { protocol: 0, .. }));
    }

    #[test]
    fn test_decode_ack_ignores_payload() {
        let req = ClientRequest::decode(r#"{"protocol":115,"data":[1,2,3]}"#).unwrap();
        assert_eq!(req, ClientRequest::Acknowledge);
    }

    #[test]
    fn test_decode_unknown_keeps_raw() {
        let text = r#"{"protocol":42,"data":{}}"#;
        let req = ClientRequest::decode(text).unwrap();
        assert_eq!(req.protocol(), 42);
        assert!(matches!(req, ClientRequest::Unknown { raw, .. } if raw == text));
    }

    #[test]
    fn test_decode_rejects_bad_envelope() {
        assert!(matches!(
            ClientRequest::decode("not json"),
            Err(DecodeError::Envelope(_))
        ));
        assert!(matches!(
            ClientRequest::decode(r#"{"data":{}}"#),
            Err(DecodeError::Envelope(_))
        ));
        assert!(matches!(
            ClientRequest::decode(r#"{"protocol":"zero"}"#),
            Err(DecodeError::Envelope(_))
        ));
    }

    #[test]
    fn test_auth_response_field_names() {
        let identity = Identity {
            id: 11,
            account: "alice".to_string(),
            display_name: "Alice".to_string(),
        };
        let frame = ServerFrame::Auth(AuthResponse::success(&identity, "SID".to_string()));
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "protocol": 0,
                "data": {
                    "memberID": 11,
                    "account": "alice",
                    "userName": "Alice",
                    "sid": "SID",
                    "bOk": true,
                    "bValidPassword": true
                }
            })
        );
    }

    #[test]
    fn test_fixed_frames() {
        let ack: Value = serde_json::from_str(&ServerFrame::Ack.to_json().unwrap()).unwrap();
        assert_eq!(ack, json!({"protocol": 115, "data": {}}));

        let keepalive: Value =
            serde_json::from_str(&ServerFrame::Keepalive.to_json().unwrap()).unwrap();
        assert_eq!(keepalive, json!({"protocol": 999, "data": {}}));

        let error: Value = serde_json::from_str(
            &ServerFrame::Error(ErrorCode::DataFormat).to_json().unwrap(),
        )
        .unwrap();
        assert_eq!(error, json!({"code": 4006, "err_msg": "data format err"}));
    }
}
