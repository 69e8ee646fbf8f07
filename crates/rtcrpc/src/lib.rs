//! gRPC over a single multiplexed WebRTC data channel.
//!
//! rtcrpc carries many concurrent gRPC calls over one ordered data channel,
//! negotiated through a signaling service.
//!
//! # Crate Structure
//!
//! - [`transport`]: Peer connection and data channel seam, channel lifecycle
//! - [`frame`]: Request/response frames, packetization and reassembly
//! - [`peer`]: Stream multiplexing, call state machines and the dial handshake
//! - [`logging`]: `tracing` subscriber setup

pub mod logging;

/// Re-export transport types.
pub mod transport {
    pub use rtcrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use rtcrpc_frame::*;
}

/// Re-export peer types.
pub mod peer {
    pub use rtcrpc_peer::*;
}

pub use rtcrpc_peer::{
    dial_webrtc, dial_webrtc_with_auth, ClientChannel, DialAuth, DialOptions, PeerError,
    WebRtcConnection,
};
