use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("header width {0} is outside 1..=19")]
    InvalidHeaderWidth(usize),

    #[error("payload of {len} bytes does not fit a {header_len} character length header")]
    PayloadTooLarge { len: usize, header_len: usize },

    #[error("malformed length header {0:?}")]
    InvalidHeader(String),

    #[error("announced payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed transfer descriptor {0:?}")]
    InvalidTransferSize(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
