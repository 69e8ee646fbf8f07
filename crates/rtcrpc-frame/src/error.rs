/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// An inbound frame could not be deserialized.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A gRPC length-prefixed envelope is malformed.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Metadata contains a byte that cannot appear in a header block.
    #[error("metadata contains invalid ASCII: {0:#04x}")]
    InvalidMetadata(u8),
}

pub type Result<T> = std::result::Result<T, FrameError>;
