//! Session layer
//!
//! The per-connection protocol state machine (unauthenticated until proven
//! otherwise), the process-wide registry enforcing one live session per
//! account, and the wire frame types they speak.

mod error;
pub mod protocol;
mod registry;
mod session;

pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{ConnectionSession, SessionContext};
