pub mod config;
pub mod error;

// io
pub mod input;

// session
pub mod client;

pub use client::Client;
pub use config::ClientConfig;
pub use error::ClientError;
