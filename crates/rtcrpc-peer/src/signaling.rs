//! Signaling service messages and client seam.
//!
//! Field numbers follow `proto.rpc.webrtc.v1.SignalingService`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_core::stream::BoxStream;
use rtcrpc_frame::wire::RpcStatus;
use rtcrpc_frame::{MetadataMap, Status};
use rtcrpc_transport::{IceCandidateInit, SessionDescription};

/// An ICE candidate on the wire.
#[derive(Clone, PartialEq, prost::Message)]
pub struct IceCandidate {
    #[prost(string, tag = "1")]
    pub candidate: String,
    #[prost(string, optional, tag = "2")]
    pub sdp_mid: Option<String>,
    #[prost(uint32, optional, tag = "3")]
    pub sdpm_line_index: Option<u32>,
    #[prost(string, optional, tag = "4")]
    pub username_fragment: Option<String>,
}

/// Opens a signaling call with the caller's offer.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CallRequest {
    /// Base64 of the JSON session description.
    #[prost(string, tag = "1")]
    pub sdp: String,
    #[prost(bool, tag = "2")]
    pub disable_trickle: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CallResponseInitStage {
    #[prost(string, tag = "1")]
    pub sdp: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CallResponseUpdateStage {
    #[prost(message, optional, tag = "1")]
    pub candidate: Option<IceCandidate>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum CallResponseStage {
    #[prost(message, tag = "2")]
    Init(CallResponseInitStage),
    #[prost(message, tag = "3")]
    Update(CallResponseUpdateStage),
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CallResponse {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(oneof = "CallResponseStage", tags = "2, 3")]
    pub stage: Option<CallResponseStage>,
}

impl CallResponse {
    pub fn init(uuid: impl Into<String>, sdp: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            stage: Some(CallResponseStage::Init(CallResponseInitStage { sdp: sdp.into() })),
        }
    }

    pub fn update(uuid: impl Into<String>, candidate: IceCandidate) -> Self {
        Self {
            uuid: uuid.into(),
            stage: Some(CallResponseStage::Update(CallResponseUpdateStage {
                candidate: Some(candidate),
            })),
        }
    }
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum CallUpdate {
    #[prost(message, tag = "2")]
    Candidate(IceCandidate),
    #[prost(bool, tag = "3")]
    Done(bool),
    #[prost(message, tag = "4")]
    Error(RpcStatus),
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CallUpdateRequest {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(oneof = "CallUpdate", tags = "2, 3, 4")]
    pub update: Option<CallUpdate>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CallUpdateResponse {}

/// Errors reported by a signaling client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    /// The call ended before the server sent response headers.
    #[error("Response closed without headers")]
    NoHeaders,

    /// The server ended the call with a status.
    #[error("{0}")]
    Status(Status),

    /// The signaling transport failed.
    #[error("signaling transport failed: {0}")]
    Transport(String),

    /// A session description could not be encoded or decoded.
    #[error("invalid session description: {0}")]
    InvalidSdp(String),
}

/// Server responses to a signaling call, in order.
pub type CallResponseStream = BoxStream<'static, Result<CallResponse, SignalingError>>;

/// Client for the signaling service.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Bidirectional `Call`: send the offer, receive init then updates.
    async fn call(
        &self,
        metadata: MetadataMap,
        request: CallRequest,
    ) -> Result<CallResponseStream, SignalingError>;

    /// Unary `CallUpdate`.
    async fn call_update(
        &self,
        metadata: MetadataMap,
        request: CallUpdateRequest,
    ) -> Result<CallUpdateResponse, SignalingError>;
}

/// Encode a session description as base64 of its JSON form.
pub fn encode_sdp(desc: &SessionDescription) -> Result<String, SignalingError> {
    let json =
        serde_json::to_vec(desc).map_err(|err| SignalingError::InvalidSdp(err.to_string()))?;
    Ok(STANDARD.encode(json))
}

/// Decode a session description from base64 of its JSON form.
pub fn decode_sdp(encoded: &str) -> Result<SessionDescription, SignalingError> {
    let json = STANDARD
        .decode(encoded.trim())
        .map_err(|err| SignalingError::InvalidSdp(err.to_string()))?;
    serde_json::from_slice(&json).map_err(|err| SignalingError::InvalidSdp(err.to_string()))
}

impl From<&IceCandidateInit> for IceCandidate {
    fn from(candidate: &IceCandidateInit) -> Self {
        Self {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdpm_line_index: candidate.sdp_mline_index.map(u32::from),
            username_fragment: candidate.username_fragment.clone(),
        }
    }
}

impl From<IceCandidate> for IceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate
                .sdpm_line_index
                .and_then(|index| u16::try_from(index).ok()),
            username_fragment: candidate.username_fragment,
        }
    }
}
