use std::time::Duration;

use rtcrpc_frame::{Code, FrameError, Status};
use rtcrpc_transport::TransportError;

use crate::signaling::SignalingError;

/// Errors that can occur in stream, channel and handshake operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PeerError {
    /// The channel or peer connection is gone.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The channel already carries the maximum number of concurrent streams.
    #[error("stream limit hit ({0} concurrent streams)")]
    StreamLimitExceeded(usize),

    /// Frames arrived out of order for a stream.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server completed the call with a non-OK status.
    #[error("{0}")]
    RemoteStatus(Status),

    /// Frame-level error (decode, size limit, metadata encoding).
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Signaling exchange failed.
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// The stream was cancelled locally.
    #[error("stream cancelled")]
    Cancelled,

    /// A call or dial did not finish in time.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// A call operation was used out of order.
    #[error("invalid call state: {0}")]
    InvalidState(String),

    /// Conflicting or malformed dial options.
    #[error("invalid dial options: {0}")]
    InvalidOptions(String),

    /// Transport-level error that does not mean the connection is gone.
    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for PeerError {
    fn from(err: TransportError) -> Self {
        if err.is_connection_closed() {
            PeerError::ConnectionClosed(err.to_string())
        } else {
            PeerError::Transport(err)
        }
    }
}

impl PeerError {
    /// The gRPC code a caller sees for this error.
    pub fn code(&self) -> Code {
        match self {
            PeerError::ConnectionClosed(_) => Code::Unavailable,
            PeerError::StreamLimitExceeded(_) => Code::ResourceExhausted,
            PeerError::ProtocolViolation(_) => Code::Internal,
            PeerError::RemoteStatus(status) => status.code,
            PeerError::Frame(_) => Code::Internal,
            PeerError::Signaling(SignalingError::Status(status)) => status.code,
            PeerError::Signaling(_) => Code::Unknown,
            PeerError::Cancelled => Code::Cancelled,
            PeerError::DeadlineExceeded(_) => Code::DeadlineExceeded,
            PeerError::InvalidState(_) => Code::FailedPrecondition,
            PeerError::InvalidOptions(_) => Code::InvalidArgument,
            PeerError::Transport(_) => Code::Internal,
        }
    }

    /// This error as a gRPC status.
    pub fn status(&self) -> Status {
        match self {
            PeerError::RemoteStatus(status) => status.clone(),
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_transport_errors_become_connection_closed() {
        let err: PeerError = TransportError::ConnectionClosed("data channel closed".into()).into();
        assert!(matches!(err, PeerError::ConnectionClosed(_)));
        assert_eq!(err.code(), Code::Unavailable);

        let err: PeerError = TransportError::Send("buffer full".into()).into();
        assert!(matches!(err, PeerError::Transport(_)));
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn remote_status_keeps_code_and_message() {
        let err = PeerError::RemoteStatus(Status::new(Code::NotFound, "missing"));
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.status(), Status::new(Code::NotFound, "missing"));
        assert_eq!(err.to_string(), "NOT_FOUND: missing");
    }

    #[test]
    fn local_errors_map_to_codes() {
        assert_eq!(PeerError::Cancelled.code(), Code::Cancelled);
        assert_eq!(
            PeerError::DeadlineExceeded(Duration::from_secs(1)).code(),
            Code::DeadlineExceeded
        );
        assert_eq!(PeerError::StreamLimitExceeded(256).code(), Code::ResourceExhausted);
        assert_eq!(
            PeerError::ProtocolViolation("headers already received".into())
                .status()
                .code,
            Code::Internal
        );
    }
}
