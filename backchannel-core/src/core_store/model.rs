//! Persisted account record

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A registered user.
///
/// `identity_key` and `handshake_keys` are opaque blobs uploaded at
/// registration; the server stores and returns them without ever looking
/// inside. `friends` is reserved protocol surface and is never mutated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique, case-sensitive, immutable once created.
    pub name: String,

    /// PHC-format hash string. Never logged, never sent to clients.
    pub password_hash: String,

    /// Public key plus encrypted secret key and nonce.
    pub identity_key: Value,

    /// Pre-key bundle for future key exchange.
    pub handshake_keys: Vec<Value>,

    /// Account names this user has added. Empty at creation.
    pub friends: Vec<String>,
}

impl Account {
    pub fn new(
        name: String,
        password_hash: String,
        identity_key: Value,
        handshake_keys: Vec<Value>,
    ) -> Self {
        Self {
            name,
            password_hash,
            identity_key,
            handshake_keys,
            friends: Vec::new(),
        }
    }

    /// The record as sent to its owner: everything except the password hash.
    pub fn state_view(&self) -> Value {
        json!({
            "name": self.name,
            "identityKey": self.identity_key,
            "handshakeKeys": self.handshake_keys,
            "friends": self.friends,
        })
    }
}
