//! Session error types

use thiserror::Error;

use crate::core_auth::HasherError;
use crate::core_store::StoreError;

/// Fatal connection errors.
///
/// Recoverable protocol problems (unknown command, duplicate account,
/// duplicate session, bad credentials) are ordinary `error` replies and never
/// surface here. Anything that does surface here costs the client its
/// connection: one `error` frame, deregistration, close.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Credential hashing failed: {0}")]
    Hasher(#[from] HasherError),

    #[error("Account store failed: {0}")]
    Store(#[from] StoreError),
}
