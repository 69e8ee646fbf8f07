//! Peer connection and data channel abstraction.
//!
//! Provides a unified interface over the WebRTC machinery a gRPC channel
//! needs:
//! - An opaque peer connection (offer/answer, ICE candidates, state changes)
//! - A single ordered, unreliable message data channel
//!
//! This is the lowest layer of rtcrpc. Everything else builds on top of
//! the [`ChannelLifecycle`] type provided here.

pub mod error;
pub mod lifecycle;
pub mod traits;

pub use error::{Result, TransportError};
pub use lifecycle::{ChannelLifecycle, Readiness};
pub use traits::{
    CandidateReceiver, ChannelEvent, DataChannel, EventReceiver, IceCandidateInit,
    IceConnectionState, PeerConnection, PeerConnectionFactory, PeerConnectionParts, SdpType,
    SessionDescription,
};
