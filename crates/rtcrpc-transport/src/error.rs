use crate::traits::IceConnectionState;

/// Errors that can occur in peer connection and data channel operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The data channel or peer connection has been closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// ICE reached a terminal state before the channel opened.
    #[error("ICE connection failed with state: {0}")]
    IceFailed(IceConnectionState),

    /// The data channel reported an error.
    #[error("data channel error: {0}")]
    Channel(String),

    /// Sending on the data channel failed.
    #[error("failed to send on data channel: {0}")]
    Send(String),

    /// A peer connection primitive (offer, description, candidate) failed.
    #[error("peer connection error: {0}")]
    PeerConnection(String),

    /// The event source feeding the channel went away.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Returns true if this error means the connection is gone for good.
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionClosed(_)
                | TransportError::IceFailed(_)
                | TransportError::Channel(_)
                | TransportError::Shutdown
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
