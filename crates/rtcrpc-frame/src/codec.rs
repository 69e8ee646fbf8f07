use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;

use crate::error::{FrameError, Result};
use crate::wire::{Request, Response};

/// Envelope header: flags (1) + length (4) = 5 bytes.
pub const ENVELOPE_HEADER_SIZE: usize = 5;

/// Envelope flag marking a trailer block instead of a message.
pub const TRAILER_FLAG: u8 = 0x80;

/// Default maximum reassembled message size: 32 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 25;

/// Default maximum payload bytes per outbound packet.
///
/// Leaves room under the 16 KiB data channel message size for the
/// surrounding `Request` framing.
pub const DEFAULT_MAX_PACKET_DATA_SIZE: usize = 16373;

/// Configuration for packetizing and reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Maximum size of one logical message in bytes. Default: 32 MiB.
    pub max_message_size: usize,
    /// Maximum payload bytes carried by one packet. Default: 16373.
    pub max_packet_data_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_packet_data_size: DEFAULT_MAX_PACKET_DATA_SIZE,
        }
    }
}

/// Serialize a client frame.
pub fn encode_request(request: &Request) -> Bytes {
    Bytes::from(request.encode_to_vec())
}

/// Parse a client frame.
pub fn decode_request(buf: &[u8]) -> Result<Request> {
    Ok(Request::decode(buf)?)
}

/// Serialize a server frame.
pub fn encode_response(response: &Response) -> Bytes {
    Bytes::from(response.encode_to_vec())
}

/// Parse a server frame.
pub fn decode_response(buf: &[u8]) -> Result<Response> {
    Ok(Response::decode(buf)?)
}

/// A gRPC length-prefixed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub flags: u8,
    pub payload: Bytes,
}

impl Envelope {
    /// True if this envelope carries a trailer block.
    pub fn is_trailer(&self) -> bool {
        self.flags & TRAILER_FLAG != 0
    }
}

/// Encode a payload into the gRPC envelope format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────────┬──────────────────┐
/// │ Flags (1B) │ Length       │ Payload          │
/// │ 0x00 msg   │ (4B BE)      │ (Length bytes)   │
/// │ 0x80 trl   │              │                  │
/// └────────────┴──────────────┴──────────────────┘
/// ```
pub fn encode_envelope(flags: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::MessageTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(ENVELOPE_HEADER_SIZE + payload.len());
    dst.put_u8(flags);
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Wrap a complete message payload in a data envelope.
pub fn envelope_message(payload: &[u8]) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
    encode_envelope(0, payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode one envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete envelope yet.
/// On success, consumes the envelope bytes from the buffer.
pub fn decode_envelope(src: &mut BytesMut, max_message_size: usize) -> Result<Option<Envelope>> {
    if src.len() < ENVELOPE_HEADER_SIZE {
        return Ok(None);
    }

    let flags = src[0];
    let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
    if len > max_message_size {
        return Err(FrameError::MessageTooLarge {
            size: len,
            max: max_message_size,
        });
    }

    if src.len() < ENVELOPE_HEADER_SIZE + len {
        return Ok(None);
    }

    src.advance(ENVELOPE_HEADER_SIZE);
    let payload = src.split_to(len).freeze();
    Ok(Some(Envelope { flags, payload }))
}

/// Strip the envelope from a single complete message.
pub fn unwrap_message(enveloped: &Bytes) -> Result<Bytes> {
    if enveloped.len() < ENVELOPE_HEADER_SIZE {
        return Err(FrameError::InvalidEnvelope(format!(
            "{} bytes is shorter than the envelope header",
            enveloped.len()
        )));
    }
    let len = u32::from_be_bytes([enveloped[1], enveloped[2], enveloped[3], enveloped[4]]) as usize;
    if enveloped.len() != ENVELOPE_HEADER_SIZE + len {
        return Err(FrameError::InvalidEnvelope(format!(
            "declared length {} does not match payload length {}",
            len,
            enveloped.len() - ENVELOPE_HEADER_SIZE
        )));
    }
    Ok(enveloped.slice(ENVELOPE_HEADER_SIZE..))
}
