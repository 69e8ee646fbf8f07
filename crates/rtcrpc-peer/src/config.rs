use rtcrpc_frame::{FrameConfig, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_PACKET_DATA_SIZE};
use serde::Deserialize;

/// Default maximum number of concurrent streams per channel.
pub const DEFAULT_MAX_STREAMS: usize = 256;

/// Limits for one multiplexed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Maximum concurrent streams in the table. Default: 256.
    pub max_streams: usize,
    /// Maximum reassembled message size in bytes. Default: 32 MiB.
    pub max_message_size: usize,
    /// Maximum payload bytes per outbound packet. Default: 16373.
    pub max_packet_data_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_streams: DEFAULT_MAX_STREAMS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_packet_data_size: DEFAULT_MAX_PACKET_DATA_SIZE,
        }
    }
}

impl ChannelConfig {
    pub fn with_max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = max_streams;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_max_packet_data_size(mut self, max_packet_data_size: usize) -> Self {
        self.max_packet_data_size = max_packet_data_size;
        self
    }

    /// Packetizing and reassembly limits for streams on this channel.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_message_size: self.max_message_size,
            max_packet_data_size: self.max_packet_data_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.max_streams, 256);
        assert_eq!(config.max_message_size, 1 << 25);
        assert_eq!(config.max_packet_data_size, 16373);
        assert_eq!(config.frame_config(), FrameConfig::default());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ChannelConfig = serde_json::from_str(r#"{"max_streams": 8}"#).unwrap();
        assert_eq!(config.max_streams, 8);
        assert_eq!(config.max_packet_data_size, 16373);
    }

    #[test]
    fn builder_overrides() {
        let config = ChannelConfig::default()
            .with_max_streams(2)
            .with_max_packet_data_size(4);
        assert_eq!(config.max_streams, 2);
        assert_eq!(config.frame_config().max_packet_data_size, 4);
    }
}
