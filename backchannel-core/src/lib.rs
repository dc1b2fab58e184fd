//! Core library for the backchannel messaging server.
//!
//! The interesting part lives in `core_session` and `core_server`: the
//! authenticate-then-act protocol state machine and the WebSocket dispatcher
//! that drives it. `core_auth` wraps the password hashing function,
//! `core_store` holds the persisted account collection.

pub mod config;
pub mod core_auth;
pub mod core_server;
pub mod core_session;
pub mod core_store;
pub mod logging;
pub mod shutdown;

pub use config::Config;
pub use core_auth::CredentialHasher;
pub use core_server::WsServer;
pub use core_session::SessionRegistry;
pub use shutdown::ShutdownCoordinator;
