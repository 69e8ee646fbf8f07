//! Protobuf messages exchanged over the data channel.
//!
//! Field numbers follow the `proto.rpc.webrtc.v1` gRPC schema so frames are
//! interoperable with existing WebRTC gRPC servers.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Identifies one multiplexed stream.
#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct Stream {
    #[prost(uint64, tag = "1")]
    pub id: u64,
}

/// A fragment of one logical message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PacketMessage {
    #[prost(bytes = "bytes", tag = "1")]
    pub data: Bytes,
    /// Set on the last fragment of a message.
    #[prost(bool, tag = "2")]
    pub eom: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Strings {
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
}

/// Header or trailer metadata on the wire.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Metadata {
    #[prost(btree_map = "string, message", tag = "1")]
    pub md: BTreeMap<String, Strings>,
}

/// `google.rpc.Status`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<prost_types::Any>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RequestHeaders {
    /// Full method path, `/package.Service/Method`.
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<Metadata>,
    #[prost(message, optional, tag = "3")]
    pub timeout: Option<prost_types::Duration>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RequestMessage {
    /// False for a bare end-of-stream marker that carries no payload.
    #[prost(bool, tag = "1")]
    pub has_message: bool,
    #[prost(message, optional, tag = "2")]
    pub packet_message: Option<PacketMessage>,
    /// Client half-close.
    #[prost(bool, tag = "3")]
    pub eos: bool,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum RequestType {
    #[prost(message, tag = "2")]
    Headers(RequestHeaders),
    #[prost(message, tag = "3")]
    Message(RequestMessage),
    #[prost(bool, tag = "4")]
    RstStream(bool),
}

/// Client-to-server frame.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Request {
    #[prost(message, optional, tag = "1")]
    pub stream: Option<Stream>,
    #[prost(oneof = "RequestType", tags = "2, 3, 4")]
    pub kind: Option<RequestType>,
}

impl Request {
    /// Headers frame opening a stream.
    pub fn headers(stream_id: u64, headers: RequestHeaders) -> Self {
        Self {
            stream: Some(Stream { id: stream_id }),
            kind: Some(RequestType::Headers(headers)),
        }
    }

    /// Message (packet) frame.
    pub fn message(stream_id: u64, message: RequestMessage) -> Self {
        Self {
            stream: Some(Stream { id: stream_id }),
            kind: Some(RequestType::Message(message)),
        }
    }

    /// Reset frame cancelling a stream.
    pub fn reset(stream_id: u64) -> Self {
        Self {
            stream: Some(Stream { id: stream_id }),
            kind: Some(RequestType::RstStream(true)),
        }
    }

    pub fn stream_id(&self) -> Option<u64> {
        self.stream.map(|stream| stream.id)
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResponseHeaders {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<Metadata>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResponseMessage {
    #[prost(message, optional, tag = "1")]
    pub packet_message: Option<PacketMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResponseTrailers {
    #[prost(message, optional, tag = "1")]
    pub status: Option<RpcStatus>,
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<Metadata>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum ResponseType {
    #[prost(message, tag = "2")]
    Headers(ResponseHeaders),
    #[prost(message, tag = "3")]
    Message(ResponseMessage),
    #[prost(message, tag = "4")]
    Trailers(ResponseTrailers),
}

/// Server-to-client frame.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Response {
    #[prost(message, optional, tag = "1")]
    pub stream: Option<Stream>,
    #[prost(oneof = "ResponseType", tags = "2, 3, 4")]
    pub kind: Option<ResponseType>,
}

impl Response {
    pub fn headers(stream_id: u64, headers: ResponseHeaders) -> Self {
        Self {
            stream: Some(Stream { id: stream_id }),
            kind: Some(ResponseType::Headers(headers)),
        }
    }

    pub fn message(stream_id: u64, packet: PacketMessage) -> Self {
        Self {
            stream: Some(Stream { id: stream_id }),
            kind: Some(ResponseType::Message(ResponseMessage {
                packet_message: Some(packet),
            })),
        }
    }

    pub fn trailers(stream_id: u64, trailers: ResponseTrailers) -> Self {
        Self {
            stream: Some(Stream { id: stream_id }),
            kind: Some(ResponseType::Trailers(trailers)),
        }
    }

    pub fn stream_id(&self) -> Option<u64> {
        self.stream.map(|stream| stream.id)
    }
}
