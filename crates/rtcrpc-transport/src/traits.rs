use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// ICE connection state as reported by the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl IceConnectionState {
    /// Returns true for states after which the connection never recovers.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IceConnectionState::Failed
                | IceConnectionState::Disconnected
                | IceConnectionState::Closed
        )
    }

    /// Lowercase name, matching the browser `iceConnectionState` strings.
    pub fn as_str(self) -> &'static str {
        match self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an SDP session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// An SDP session description.
///
/// Serializes to the same JSON shape as the browser `RTCSessionDescription`
/// (`{"type": "offer", "sdp": "..."}`), which is what travels over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A single ICE candidate, local or remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceCandidateInit {
    /// The candidate attribute line.
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
    pub username_fragment: Option<String>,
}

impl IceCandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Self::default()
        }
    }
}

/// Events raised by the data channel and its owning peer connection.
///
/// These replace the browser-style `onopen`/`onclose`/`onerror`/`onmessage`
/// and `iceconnectionstatechange` callbacks. They are delivered in order
/// through an [`EventReceiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The data channel is open and writable.
    Open,
    /// A complete binary message arrived on the data channel.
    Message(Bytes),
    /// The data channel closed.
    Close,
    /// The data channel reported an error.
    Error(String),
    /// The peer connection's ICE state changed.
    IceConnectionStateChange(IceConnectionState),
}

/// Ordered channel events for one peer connection.
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Locally discovered ICE candidates; `None` marks the end of gathering.
pub type CandidateReceiver = mpsc::UnboundedReceiver<Option<IceCandidateInit>>;

/// The opaque peer connection primitive.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create a local SDP offer.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply a local description; starts ICE gathering.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Current local description, including gathered candidates if any.
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Apply the remote peer's description.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply one remote ICE candidate.
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()>;

    /// Current ICE connection state.
    fn ice_connection_state(&self) -> IceConnectionState;

    /// Tear down the connection. Must be safe to call more than once.
    fn close(&self);
}

/// A bidirectional ordered message channel carried by a peer connection.
pub trait DataChannel: Send + Sync {
    /// Channel label negotiated with the peer.
    fn label(&self) -> &str;

    /// Send one binary message.
    fn send(&self, data: Bytes) -> Result<()>;
}

/// Everything produced when a client peer connection is created.
pub struct PeerConnectionParts {
    pub connection: Arc<dyn PeerConnection>,
    pub data_channel: Arc<dyn DataChannel>,
    pub events: EventReceiver,
    pub local_candidates: CandidateReceiver,
}

impl fmt::Debug for PeerConnectionParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnectionParts")
            .field("data_channel", &self.data_channel.label())
            .field("ice_state", &self.connection.ice_connection_state())
            .finish_non_exhaustive()
    }
}

/// Creates client-side peer connections with a pre-negotiated data channel.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Create a peer connection. When `disable_trickle_ice` is set the
    /// caller will wait for gathering to finish before sending its offer.
    async fn create(&self, disable_trickle_ice: bool) -> Result<PeerConnectionParts>;
}
