use std::io;

use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection i/o: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ServerError {
    // i/o failures mean the client went away, anything else is its fault
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ServerError::Io(_) | ServerError::Protocol(ProtocolError::Io(_)))
    }
}
