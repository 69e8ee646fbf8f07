use bytes::Bytes;

use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::wire::{PacketMessage, RequestMessage};

/// Split an outbound message into request packets.
///
/// Each packet carries at most `max_packet_data_size` bytes; the last one is
/// flagged end-of-message. An absent or empty message becomes a single bare
/// end-of-message packet with `has_message` unset, which is how a client
/// half-close is expressed when `eos` is set.
pub fn packetize(
    message: Option<Bytes>,
    eos: bool,
    config: &FrameConfig,
) -> Result<Vec<RequestMessage>> {
    let data = match message {
        Some(data) if !data.is_empty() => data,
        _ => {
            return Ok(vec![RequestMessage {
                has_message: false,
                packet_message: Some(PacketMessage {
                    data: Bytes::new(),
                    eom: true,
                }),
                eos,
            }]);
        }
    };

    if data.len() > config.max_message_size {
        return Err(FrameError::MessageTooLarge {
            size: data.len(),
            max: config.max_message_size,
        });
    }

    let chunk_size = config.max_packet_data_size.max(1);
    let mut packets = Vec::with_capacity(data.len().div_ceil(chunk_size));
    let mut offset = 0usize;
    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        packets.push(RequestMessage {
            has_message: true,
            packet_message: Some(PacketMessage {
                data: data.slice(offset..end),
                eom: end == data.len(),
            }),
            eos,
        });
        offset = end;
    }

    Ok(packets)
}
