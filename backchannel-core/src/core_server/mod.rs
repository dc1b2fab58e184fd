//! WebSocket dispatcher
//!
//! Accepts connections, wires each one to a `ConnectionSession`, and owns
//! the teardown paths: client close, fatal protocol error, heartbeat reap,
//! server shutdown. Whatever the path, a bound account name leaves the
//! session registry exactly once.

mod connection;
mod error;
mod heartbeat;
mod server;

pub use error::ServerError;
pub use server::WsServer;
