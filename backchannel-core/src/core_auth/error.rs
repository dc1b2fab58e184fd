//! Credential hasher error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HasherError {
    #[error("Invalid hashing parameters: {0}")]
    InvalidParams(String),

    #[error("Password hashing failed: {0}")]
    HashFailed(String),

    #[error("Stored hash is malformed: {0}")]
    MalformedHash(String),

    #[error("Hashing task failed: {0}")]
    TaskFailed(String),
}
