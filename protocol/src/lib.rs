//! Wire format shared by the relay server and client.
//!
//! Every message is a single type byte, a fixed-width decimal length header
//! (left-justified, space-padded) and a payload of exactly that many bytes.
//! The only unframed traffic is the raw byte stream that follows a
//! `FILE_START` frame.

use std::borrow::Cow;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

mod error;
mod transfer;

pub use error::ProtocolError;
pub use transfer::TransferDescriptor;

// encode and decode bypass traditional libraries
// like serde or message pack

pub const MESSAGE: u8 = b'M';
pub const SYSTEM: u8 = b'S';
pub const USER_LOOKUP: u8 = b'U';
pub const FILE_OFFER: u8 = b'F';
pub const FILE_ACCEPT: u8 = b'A';
pub const FILE_START: u8 = b'X';
pub const CONTROL: u8 = b'/';

pub const DEFAULT_HEADER_LEN: usize = 10;
pub const CHUNK_SIZE: usize = 4096;
/// Largest payload a decoder accepts unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

// widest header whose maximum value still fits a u64 length
const MAX_HEADER_LEN: usize = 19;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self { tag, payload: payload.into() }
    }

    pub fn system(text: &str) -> Self {
        Self::new(SYSTEM, text.as_bytes())
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    header_len: usize,
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            header_len: DEFAULT_HEADER_LEN,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl FrameCodec {
    pub fn new(header_len: usize) -> Result<Self, ProtocolError> {
        if header_len == 0 || header_len > MAX_HEADER_LEN {
            return Err(ProtocolError::InvalidHeaderWidth(header_len));
        }

        Ok(Self { header_len, ..Self::default() })
    }

    /// Caps the payload length a peer may announce. Anything larger is
    /// rejected as soon as its header is read, before buffering starts.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Largest payload whose length still fits the header field.
    pub fn max_payload(&self) -> u64 {
        10u64.pow(self.header_len as u32) - 1
    }

    /// Packs `payload` behind `tag` and a length header into one wire frame.
    pub fn encode(&self, tag: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut dst = BytesMut::new();
        self.put_frame(tag, payload, &mut dst)?;
        Ok(dst.to_vec())
    }

    fn put_frame(&self, tag: u8, payload: &[u8], dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if payload.len() as u64 > self.max_payload() {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                header_len: self.header_len,
            });
        }

        let header = format!("{:<width$}", payload.len(), width = self.header_len);

        dst.reserve(1 + self.header_len + payload.len());
        dst.put_u8(tag);
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(payload);
        Ok(())
    }

    /// Parses a length header, tolerating the space padding.
    pub fn parse_header(&self, header: &[u8]) -> Result<usize, ProtocolError> {
        let text = String::from_utf8_lossy(header);
        text.trim()
            .parse::<usize>()
            .map_err(|_| ProtocolError::InvalidHeader(text.into_owned()))
    }

    // payload length announced by a buffered header, None until the header is complete
    fn payload_len(&self, src: &[u8]) -> Result<Option<usize>, ProtocolError> {
        if src.len() < self.header_len {
            return Ok(None);
        }

        let len = self.parse_header(&src[..self.header_len])?;
        if len > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge { len, max: self.max_frame_len });
        }
        Ok(Some(len))
    }

    /// Consumes the type byte at the front of `src`.
    pub fn decode_type_byte(&self, src: &mut BytesMut) -> Option<u8> {
        if src.is_empty() {
            return None;
        }

        Some(src.get_u8())
    }

    /// Consumes a length header and its payload from the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched while either part is
    /// still incomplete. Trailing ASCII whitespace is stripped from the payload.
    pub fn decode_frame(&self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, ProtocolError> {
        let len = match self.payload_len(&src[..])? {
            Some(len) => len,
            None => return Ok(None),
        };

        let total = self.header_len + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(self.header_len);
        let mut payload = src.split_to(len).to_vec();
        strip_trailing_whitespace(&mut payload);
        Ok(Some(payload))
    }
}

// convert bytes to Frame
impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // the type byte stays buffered until the rest of the frame has arrived
        let total = match self.payload_len(&src[1..])? {
            Some(len) => 1 + self.header_len + len,
            None => return Ok(None),
        };

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let tag = match self.decode_type_byte(src) {
            Some(tag) => tag,
            None => return Ok(None),
        };
        let payload = self.decode_frame(src)?.unwrap_or_default();

        Ok(Some(Frame { tag, payload }))
    }

    // a peer closing mid-frame is end of stream, not a malformed frame
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    debug!("stream closed mid-frame, dropping {} buffered bytes", src.len());
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

// take Frame and convert it to bytes
impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.put_frame(item.tag, &item.payload, dst)
    }
}

fn strip_trailing_whitespace(payload: &mut Vec<u8>) {
    while payload.last().map_or(false, u8::is_ascii_whitespace) {
        payload.pop();
    }
}
