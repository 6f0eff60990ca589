//! Binary frame codec
//!
//! Wire layout (big-endian):
//!
//! ```text
//! +----------+----------+----------+------------------+
//! | length:4 | magic:2  | opcode:1 | payload:length   |
//! +----------+----------+----------+------------------+
//! ```
//!
//! `length` counts payload bytes only. `encode` and `try_extract` are pure
//! functions over byte buffers; `FrameCodec` adapts them to tokio-util so a
//! `FramedRead` can own the per-connection accumulator.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::message::ServerMessage;

/// Protocol magic shared by both peers
pub const MAGIC: u16 = 0x0417;

/// length(4) + magic(2) + opcode(1)
pub const HEADER_LEN: usize = 7;

/// Default ceiling on a declared payload length (1 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 1 << 20;

/// One complete protocol unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }
}

/// Build a complete frame for `opcode` carrying `payload`
pub fn encode(opcode: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    encode_into(opcode, payload, &mut buf);
    buf.freeze()
}

/// Append a complete frame to `dst`
pub fn encode_into(opcode: u8, payload: &[u8], dst: &mut BytesMut) {
    debug_assert!(u32::try_from(payload.len()).is_ok());
    dst.reserve(HEADER_LEN + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_u16(MAGIC);
    dst.put_u8(opcode);
    dst.put_slice(payload);
}

/// Pull one frame off the front of `buf`
///
/// Returns `Ok(None)` and leaves `buf` untouched while the header or the
/// declared payload is still incomplete. Call repeatedly: a single read may
/// hold several frames. Magic is checked as soon as the header is present.
pub fn try_extract(buf: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let magic = u16::from_be_bytes([buf[4], buf[5]]);
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }

    let opcode = buf[6];
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > max_payload {
        return Err(ProtocolError::FrameTooLarge {
            opcode,
            len,
            limit: max_payload,
        });
    }

    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }

    buf.advance(HEADER_LEN);
    let payload = buf.split_to(len).freeze();

    Ok(Some(Frame { opcode, payload }))
}

/// tokio-util codec over the frame format
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload_len: usize,
}

impl FrameCodec {
    pub fn new(max_payload_len: usize) -> Self {
        Self { max_payload_len }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let frame = try_extract(src, self.max_payload_len)?;

        if frame.is_none() && src.len() >= HEADER_LEN {
            // Header is valid; make room for the rest of the payload
            let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            src.reserve(HEADER_LEN + len - src.len());
        }

        Ok(frame)
    }
}

impl Encoder<ServerMessage> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, msg: ServerMessage, dst: &mut BytesMut) -> Result<(), std::io::Error> {
        let frame = msg.into_frame();
        encode_into(frame.opcode, &frame.payload, dst);
        Ok(())
    }
}
