use std::fmt;

use tokio::io::AsyncWrite;

// server type definitions

// write half of a client connection, boxed so tests can stand in a duplex pipe
pub type ClientWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which live connections a fan-out reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Everyone except the origin.
    #[default]
    Others,
    /// Everyone, origin included.
    All,
    /// A single connection; skipped silently when absent or gone.
    Recip(Option<ConnId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    AwaitingNickname,
    Active,
    Closed,
}
