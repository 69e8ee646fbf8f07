//! gRPC frames for a single multiplexed WebRTC data channel.
//!
//! Every logical RPC is carried as a sequence of protobuf frames tagged with
//! a stream id:
//! - `Request`: headers, size-bounded message packets, or a reset
//! - `Response`: headers, message packets, or trailers with a status
//!
//! Packets are reassembled into complete messages here, so callers never
//! see a partial message.

pub mod codec;
pub mod error;
pub mod metadata;
pub mod packetizer;
pub mod reassembler;
pub mod status;
pub mod wire;

pub use codec::{
    decode_envelope, decode_request, decode_response, encode_envelope, encode_request,
    encode_response, envelope_message, unwrap_message, Envelope, FrameConfig,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_PACKET_DATA_SIZE, ENVELOPE_HEADER_SIZE, TRAILER_FLAG,
};
pub use error::{FrameError, Result};
pub use metadata::MetadataMap;
pub use packetizer::packetize;
pub use reassembler::PacketReassembler;
pub use status::{code_from_http_status, Code, Status};
