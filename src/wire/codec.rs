//! Length-prefixed JSON framing
//!
//! Every frame on the host transport is a u32 little-endian byte
//! length followed by one JSON document, the framing native-messaging
//! hosts speak.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::relay::Envelope;

/// Upper bound on a single frame's payload
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Length prefix size in bytes
const PREFIX_BYTES: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid frame payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
}

/// Codec for [`Envelope`] frames over a byte stream
#[derive(Debug, Default)]
pub struct EnvelopeCodec;

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
        if src.len() < PREFIX_BYTES {
            return Ok(None);
        }

        let mut prefix = [0u8; PREFIX_BYTES];
        prefix.copy_from_slice(&src[..PREFIX_BYTES]);
        let length = u32::from_le_bytes(prefix) as usize;
        if length > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge(length));
        }

        if src.len() < PREFIX_BYTES + length {
            src.reserve(PREFIX_BYTES + length - src.len());
            return Ok(None);
        }

        src.advance(PREFIX_BYTES);
        let payload = src.split_to(length);
        Ok(Some(serde_json::from_slice(&payload)?))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge(payload.len()));
        }
        dst.reserve(PREFIX_BYTES + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}
