//! File-transfer relay: offer, accept, then a raw byte stream from the
//! sender to the recipient it looked up.

use std::cmp;
use std::io;

use bytes::Bytes;
use protocol::{Frame, FrameCodec, TransferDescriptor, FILE_ACCEPT, FILE_OFFER, FILE_START};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::FramedRead;
use tracing::{debug, info};

use crate::delivery::Delivery;
use crate::error::ServerError;
use crate::outbound::StreamCredit;
use crate::registry::Registry;
use crate::server_types::{ConnId, Target};

#[derive(Clone)]
pub struct TransferRelay {
    registry: Registry,
    delivery: Delivery,
    codec: FrameCodec,
    chunk_size: usize,
}

impl TransferRelay {
    pub fn new(registry: &Registry, delivery: &Delivery, codec: FrameCodec, chunk_size: usize) -> Self {
        Self {
            registry: registry.clone(),
            delivery: delivery.clone(),
            codec,
            chunk_size: cmp::max(chunk_size, 1),
        }
    }

    /// Forwards an offer to the sender's looked-up recipient.
    pub async fn offer(&self, sender: ConnId, frame: &Frame) -> Result<(), ServerError> {
        let recipient = self.registry.record_offer(sender).await;
        if recipient.is_none() {
            debug!("{} offered a file without a recipient", sender);
        }

        let bytes = self.codec.encode(FILE_OFFER, &frame.payload)?;
        self.delivery.broadcast(&bytes, sender, Target::Recip(recipient)).await;
        Ok(())
    }

    /// Routes a recipient's answer back to whoever offered it the file.
    pub async fn accept(&self, recipient: ConnId, frame: &Frame) -> Result<(), ServerError> {
        let sender = self.registry.offer_sender(recipient).await;
        if sender.is_none() {
            debug!("{} answered an offer nobody made", recipient);
        }

        let bytes = self.codec.encode(FILE_ACCEPT, &frame.payload)?;
        self.delivery.broadcast(&bytes, recipient, Target::Recip(sender)).await;
        Ok(())
    }

    /// Forwards the start frame, then relays exactly the declared number of
    /// raw bytes read from the sender. The sender's connection is busy for
    /// the whole stream, and reading is paced by how fast the recipient
    /// drains its queue. Bytes are still consumed when there is nobody to
    /// forward them to, so the sender's framing stays in step.
    pub async fn stream<R>(&self, sender: ConnId, frame: &Frame,
                           reader: &mut FramedRead<R, FrameCodec>) -> Result<u64, ServerError>
    where
        R: AsyncRead + Unpin,
    {
        let descriptor = TransferDescriptor::parse(&frame.payload)?;
        let recipient = self.registry.transfer_recipient(sender).await;
        let target = Target::Recip(recipient);

        info!("{} streaming {} ({} bytes) to {:?}", sender, descriptor.name, descriptor.size, recipient);

        let bytes = self.codec.encode(FILE_START, &frame.payload)?;
        self.delivery.broadcast(&bytes, sender, target).await;

        let credit = match recipient {
            Some(conn) => self.registry.stream_credit(conn).await,
            None => {
                debug!("{} has no recipient, draining its stream", sender);
                None
            }
        };

        let mut forwarded: u64 = 0;

        // the frame decoder may already hold the start of the stream
        while forwarded < descriptor.size && !reader.read_buffer().is_empty() {
            let take = self.next_chunk(descriptor.size - forwarded).min(reader.read_buffer().len());
            let chunk = reader.read_buffer_mut().split_to(take).freeze();
            self.forward(chunk, sender, target, credit.as_ref()).await;
            forwarded += take as u64;
        }

        let mut buf = vec![0u8; self.chunk_size];
        while forwarded < descriptor.size {
            let want = self.next_chunk(descriptor.size - forwarded);
            let n = reader.get_mut().read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
                                          "sender closed mid-transfer").into());
            }

            self.forward(Bytes::copy_from_slice(&buf[..n]), sender, target, credit.as_ref()).await;
            forwarded += n as u64;
        }

        info!("{} finished streaming {} bytes", sender, forwarded);
        Ok(forwarded)
    }

    // waits for room in the recipient's backlog, never while holding the registry lock
    async fn forward(&self, chunk: Bytes, sender: ConnId, target: Target, credit: Option<&StreamCredit>) {
        let permit = match credit {
            Some(credit) => credit.reserve(chunk.len()).await,
            None => None,
        };

        self.delivery.forward(chunk, sender, target, permit).await;
    }

    fn next_chunk(&self, remaining: u64) -> usize {
        cmp::min(self.chunk_size as u64, remaining) as usize
    }
}
