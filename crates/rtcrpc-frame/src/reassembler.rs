use bytes::{Bytes, BytesMut};
use tracing::error;

use crate::codec::DEFAULT_MAX_MESSAGE_SIZE;
use crate::wire::PacketMessage;

/// Accumulates packet fragments into complete messages.
///
/// Fragments are concatenated in arrival order until one arrives with the
/// end-of-message flag. A message that would grow past the maximum size is
/// dropped whole, and reassembly starts over from an empty buffer.
#[derive(Debug)]
pub struct PacketReassembler {
    fragments: Vec<Bytes>,
    buffered: usize,
    max_message_size: usize,
}

impl Default for PacketReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketReassembler {
    /// Create a reassembler with the default 32 MiB limit.
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            fragments: Vec::new(),
            buffered: 0,
            max_message_size,
        }
    }

    /// Add one fragment.
    ///
    /// Returns the complete message when `end_of_message` is set, `None`
    /// while the message is still incomplete or after an overflow discarded
    /// it.
    pub fn add(&mut self, fragment: Bytes, end_of_message: bool) -> Option<Bytes> {
        if self.buffered + fragment.len() > self.max_message_size {
            error!(
                size = self.buffered + fragment.len(),
                max = self.max_message_size,
                "message size larger than max; discarding"
            );
            self.reset();
            return None;
        }

        self.buffered += fragment.len();
        self.fragments.push(fragment);

        if !end_of_message {
            return None;
        }

        let message = if self.fragments.len() == 1 {
            self.fragments.pop().unwrap_or_default()
        } else {
            let mut joined = BytesMut::with_capacity(self.buffered);
            for fragment in self.fragments.drain(..) {
                joined.extend_from_slice(&fragment);
            }
            joined.freeze()
        };
        self.reset();
        Some(message)
    }

    /// Add a wire packet.
    pub fn push(&mut self, packet: PacketMessage) -> Option<Bytes> {
        self.add(packet.data, packet.eom)
    }

    /// Bytes buffered for the message in progress.
    pub fn buffered_len(&self) -> usize {
        self.buffered
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn reset(&mut self) {
        self.fragments.clear();
        self.buffered = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_fragment_message() {
        let mut reassembler = PacketReassembler::new();
        let message = reassembler.add(Bytes::from_static(b"hello"), true).unwrap();
        assert_eq!(message.as_ref(), b"hello");
        assert_eq!(reassembler.buffered_len(), 0);
    }

    #[test]
    fn fragments_concatenate_in_order() {
        let mut reassembler = PacketReassembler::new();
        let mut expected = Vec::new();

        for size in 1..=8usize {
            let fragment = vec![size as u8; size * 100];
            expected.extend_from_slice(&fragment);
            assert!(reassembler.add(Bytes::from(fragment), false).is_none());
        }
        let tail = vec![0xEE; 17];
        expected.extend_from_slice(&tail);

        let message = reassembler.add(Bytes::from(tail), true).unwrap();
        assert_eq!(message.len(), expected.len());
        assert_eq!(message.as_ref(), expected.as_slice());
    }

    #[test]
    fn empty_end_of_message_yields_empty_message() {
        let mut reassembler = PacketReassembler::new();
        let message = reassembler.add(Bytes::new(), true).unwrap();
        assert!(message.is_empty());
    }

    #[test]
    fn message_at_exact_limit_is_accepted() {
        let mut reassembler = PacketReassembler::with_max_message_size(10);
        assert!(reassembler.add(Bytes::from_static(b"01234"), false).is_none());
        let message = reassembler.add(Bytes::from_static(b"56789"), true).unwrap();
        assert_eq!(message.as_ref(), b"0123456789");
    }

    #[test]
    fn overflow_discards_buffer_and_restarts() {
        let mut reassembler = PacketReassembler::with_max_message_size(10);

        assert!(reassembler.add(Bytes::from_static(b"012345"), false).is_none());
        assert_eq!(reassembler.buffered_len(), 6);

        // 6 + 5 > 10: everything buffered so far is dropped.
        assert!(reassembler.add(Bytes::from_static(b"abcde"), true).is_none());
        assert_eq!(reassembler.buffered_len(), 0);

        let message = reassembler.add(Bytes::from_static(b"fresh"), true).unwrap();
        assert_eq!(message.as_ref(), b"fresh");
    }

    #[test]
    fn oversized_single_fragment_is_dropped() {
        let mut reassembler = PacketReassembler::with_max_message_size(4);
        assert!(reassembler.add(Bytes::from_static(b"too big"), true).is_none());
        assert_eq!(reassembler.buffered_len(), 0);
    }

    #[test]
    fn push_uses_packet_flags() {
        let mut reassembler = PacketReassembler::new();
        assert!(reassembler
            .push(PacketMessage {
                data: Bytes::from_static(b"ab"),
                eom: false,
            })
            .is_none());
        let message = reassembler
            .push(PacketMessage {
                data: Bytes::from_static(b"cd"),
                eom: true,
            })
            .unwrap();
        assert_eq!(message.as_ref(), b"abcd");
    }
}
