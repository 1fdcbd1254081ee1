use std::io;

use protocol::ProtocolError;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("unable to read input: {0}")]
    Input(#[from] LinesCodecError),

    #[error("usage: {0}")]
    Usage(&'static str),
}
