//! Client side of gRPC over a WebRTC data channel.
//!
//! This is the "just works" layer. Dial a host through a signaling server,
//! then issue unary and server-streaming calls over one multiplexed channel.

pub mod auth;
pub mod call;
pub mod channel;
pub mod config;
pub mod error;
pub mod handshake;
pub mod options;
pub mod signaling;
pub mod stream;
pub mod transport;

pub use auth::{
    bearer_metadata, AuthPlan, AuthenticatedTransport, StaticToken, TokenRequest, TokenSource,
};
pub use call::{Call, GRPC_CONTENT_TYPE};
pub use channel::ClientChannel;
pub use config::{ChannelConfig, DEFAULT_MAX_STREAMS};
pub use error::{PeerError, Result};
pub use handshake::{
    dial_webrtc, dial_webrtc_with_auth, signaling_metadata, DialAuth, WebRtcConnection,
};
pub use options::{validate_dial_options, Credentials, DialOptions, DialWebRtcOptions};
pub use signaling::{CallResponseStream, SignalingClient, SignalingError};
pub use stream::{ClientStream, StreamSink};
pub use transport::{
    MethodDescriptor, MethodKind, RpcTransport, ServerStreamResponse, UnaryResponse,
};
