//! Wire protocol
//!
//! Every frame is a JSON text message of the shape
//! `{ "message": { "type": <string>, "contents": <any> } }`.
//!
//! Parsing is two-stage: the envelope first, then the contents of known
//! types. An unparseable envelope or bad contents for a known type is a
//! fatal [`SessionError::Malformed`]; an unknown type is recoverable and
//! handled by the state machine (the caller may just be ahead of this
//! server's protocol version).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::SessionError;

/// Greeting sent as soon as a connection is accepted.
pub const CONNECTED_GREETING: &str =
    "A successful connection has been established to the backchannel server.";

/// Outer frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub message: Envelope,
}

/// Type/contents pair inside every frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub contents: Value,
}

/// Server-to-client messages
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "contents", rename_all = "kebab-case")]
pub enum ServerMessage {
    Connected(String),
    Authenticated(String),
    State(Value),
    Error(String),
}

impl ServerMessage {
    /// Encode into the outer-frame JSON text.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct Outer<'a> {
            message: &'a ServerMessage,
        }
        serde_json::to_string(&Outer { message: self })
    }
}

/// `authenticate` contents
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticateContents {
    pub name: String,
    pub password: String,
}

/// `register` contents. `identity_key` must be an object and
/// `handshake_keys` an array; both stay opaque past that shape check.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterContents {
    pub name: String,
    pub password: String,
    pub identity_key: Value,
    pub handshake_keys: Vec<Value>,
}

/// Client-to-server messages after envelope dispatch
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Authenticate(AuthenticateContents),
    Register(RegisterContents),
    RetrieveState,
    /// Recognized envelope, unrecognized type.
    Unknown(String),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let frame: Frame = serde_json::from_str(text)
            .map_err(|e| SessionError::Malformed(format!("invalid frame: {e}")))?;
        let Envelope { kind, contents } = frame.message;

        match kind.as_str() {
            "authenticate" => {
                let contents: AuthenticateContents = serde_json::from_value(contents)
                    .map_err(|e| {
                        SessionError::Malformed(format!("invalid authenticate contents: {e}"))
                    })?;
                Ok(Self::Authenticate(contents))
            }
            "register" => {
                let contents: RegisterContents =
                    serde_json::from_value(contents).map_err(|e| {
                        SessionError::Malformed(format!("invalid register contents: {e}"))
                    })?;
                if !contents.identity_key.is_object() {
                    return Err(SessionError::Malformed(
                        "identityKey must be an object".to_string(),
                    ));
                }
                Ok(Self::Register(contents))
            }
            "retrieve-state" => Ok(Self::RetrieveState),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}
