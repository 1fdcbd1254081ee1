//! Per-connection write queue.
//!
//! Fan-out only enqueues, so it never waits on a client's socket while the
//! registry lock is held. Each connection has one writer task draining its
//! queue into the socket in enqueue order.

use std::cmp;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use protocol::CHUNK_SIZE;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::server_types::ClientWriter;

/// Raw file bytes allowed to sit unwritten in one recipient's queue.
pub const STREAM_BACKLOG: usize = 64 * CHUNK_SIZE;

pub struct Outgoing {
    bytes: Bytes,
    // released once the bytes are written, letting the streaming sender continue
    _credit: Option<OwnedSemaphorePermit>,
}

/// Sending side of a connection's queue, held by the registry.
#[derive(Clone)]
pub struct Outbound {
    tx: UnboundedSender<Outgoing>,
    credit: StreamCredit,
}

impl Outbound {
    pub fn channel() -> (Self, UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let credit = StreamCredit(Arc::new(Semaphore::new(STREAM_BACKLOG)));
        (Self { tx, credit }, rx)
    }

    /// Queues `bytes`; false once the writer task has stopped.
    pub fn push(&self, bytes: Bytes, credit: Option<OwnedSemaphorePermit>) -> bool {
        self.tx.send(Outgoing { bytes, _credit: credit }).is_ok()
    }

    pub fn credit(&self) -> StreamCredit {
        self.credit.clone()
    }
}

/// Bounds how far a file stream may run ahead of its recipient.
#[derive(Clone)]
pub struct StreamCredit(Arc<Semaphore>);

impl StreamCredit {
    /// Waits until `len` more bytes fit in the recipient's backlog.
    pub async fn reserve(&self, len: usize) -> Option<OwnedSemaphorePermit> {
        let permits = cmp::min(len, STREAM_BACKLOG) as u32;
        Arc::clone(&self.0).acquire_many_owned(permits).await.ok()
    }
}

/// Writes queued bytes until every sender is gone, then shuts the socket's
/// write side. Returns the first write error.
pub async fn drain(mut rx: UnboundedReceiver<Outgoing>, mut writer: ClientWriter) -> io::Result<()> {
    while let Some(out) = rx.recv().await {
        writer.write_all(&out.bytes).await?;
        writer.flush().await?;
    }

    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_drain_writes_in_order_then_closes() {
        let (outbound, rx) = Outbound::channel();
        let (near, mut far) = tokio::io::duplex(64);

        assert!(outbound.push(Bytes::from_static(b"one "), None));
        assert!(outbound.push(Bytes::from_static(b"two"), None));
        drop(outbound);

        drain(rx, Box::new(near)).await.unwrap();

        let mut got = Vec::new();
        far.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"one two");
    }

    #[tokio::test]
    async fn test_credit_returns_after_write() {
        let (outbound, rx) = Outbound::channel();
        let (near, mut far) = tokio::io::duplex(STREAM_BACKLOG * 2);
        let credit = outbound.credit();

        let permit = credit.reserve(STREAM_BACKLOG).await;
        assert!(permit.is_some());
        outbound.push(Bytes::from(vec![1u8; STREAM_BACKLOG]), permit);

        // the backlog is full until the writer has written those bytes
        let blocked = tokio::time::timeout(Duration::from_millis(50), credit.reserve(1)).await;
        assert!(blocked.is_err());

        let writer = tokio::spawn(drain(rx, Box::new(near)));
        let mut buf = vec![0; STREAM_BACKLOG];
        far.read_exact(&mut buf).await.unwrap();
        assert!(credit.reserve(STREAM_BACKLOG).await.is_some());

        drop(outbound);
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_push_fails_after_writer_stops() {
        let (outbound, rx) = Outbound::channel();
        drop(rx);
        assert!(!outbound.push(Bytes::from_static(b"late"), None));
    }
}
