//! Multi-client chat relay server.
//!
//! Clients log in with a nickname, then exchange length-prefixed frames that
//! the server fans out to each other, answers itself (control commands, user
//! lookups), or relays point to point for file transfers.

pub mod config;
pub mod error;
pub mod server_types;

// shared state
pub mod registry;
pub mod server;

// fan out
pub mod delivery;
pub mod outbound;

// per client
pub mod client_handler;
pub mod commands;
pub mod transfer;

pub mod server_listener;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::ServerContext;
pub use server_listener::ServerListener;
