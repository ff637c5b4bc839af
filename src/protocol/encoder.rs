//! Encoder producing an export stream from an [`ExportBuffer`].
//!
//! Each call to [`ExportEncoder::update`] emits one update: the sync sequence
//! followed by blocks covering every dirty word. Dirty words close to each
//! other share a block, with the clean words in between sent along.
//!
//! # Example
//!
//! ```
//! use export_stream::buffer::ExportBuffer;
//! use export_stream::protocol::{EncoderConfig, ExportDecoder, ExportEncoder, ExportEvent};
//!
//! let mut buffer = ExportBuffer::new();
//! buffer.set_word(0x0010, 0x1234);
//!
//! let mut encoder = ExportEncoder::with_config(EncoderConfig::minimal());
//! let stream = encoder.update(&mut buffer);
//!
//! let events = ExportDecoder::new().push(&stream);
//! assert_eq!(events[1], ExportEvent::WordUpdate { address: 0x0010, data: 0x1234 });
//! ```

use bytes::Bytes;
use serde::Deserialize;

use super::wire_format::{
    encode_block_into, END_OF_UPDATE_ADDRESS, SYNC_BYTE, SYNC_SEQUENCE, SYNC_WORD, WORD_STRIDE,
};
use crate::buffer::ExportBuffer;

/// Most words one block carries.
///
/// The byte count's high byte stays below `SYNC_BYTE`. It precedes the first
/// data word, which may be `SYNC_WORD`, and must not extend its sync bytes.
const MAX_BLOCK_WORDS: usize = ((SYNC_BYTE as usize) << 8) / 2 - 1;

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Clean words re-sent per update, round-robin over the buffer.
    pub autosync_per_update: usize,
    /// Largest address distance between two dirty words sharing a block.
    pub merge_gap: u16,
    /// Word marked dirty on every update so receivers see its end.
    pub end_of_update_address: Option<u16>,
}

impl EncoderConfig {
    /// Only dirty words, no autosync, no end-of-update word.
    pub fn minimal() -> Self {
        Self {
            autosync_per_update: 0,
            end_of_update_address: None,
            ..Default::default()
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            autosync_per_update: 5,
            merge_gap: 6,
            end_of_update_address: Some(END_OF_UPDATE_ADDRESS),
        }
    }
}

/// Block being assembled.
struct PendingBlock {
    address: u16,
    words: Vec<u16>,
}

impl PendingBlock {
    fn new(address: u16, data: u16) -> Self {
        Self {
            address,
            words: vec![data],
        }
    }

    fn flush(&self, out: &mut Vec<u8>) {
        encode_block_into(self.address, &self.words, out);
    }
}

/// Stateful export stream encoder.
#[derive(Debug, Clone, Default)]
pub struct ExportEncoder {
    config: EncoderConfig,
    /// Next buffer index to autosync.
    autosync_index: usize,
}

impl ExportEncoder {
    /// Create an encoder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder with custom settings.
    pub fn with_config(config: EncoderConfig) -> Self {
        Self {
            config,
            autosync_index: 0,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Encode one update and clear the buffer's dirty flags.
    ///
    /// Returns an empty buffer when no word is dirty.
    pub fn update(&mut self, buffer: &mut ExportBuffer) -> Bytes {
        if let Some(address) = self.config.end_of_update_address {
            buffer.mark_dirty(address);
        }
        self.mark_autosync(buffer);

        let words = buffer.words();
        let Some(first) = words.iter().position(|word| word.dirty) else {
            return Bytes::new();
        };

        let mut out = SYNC_SEQUENCE.to_vec();
        let mut block = PendingBlock::new(words[first].address, words[first].data);
        let mut last = words[first].address;
        let mut blocks = 1usize;

        for word in words[first + 1..].iter().filter(|word| word.dirty) {
            let gap = word.address - last;
            let fill: Vec<u16> = if gap <= self.config.merge_gap && gap % WORD_STRIDE == 0 {
                (1..=gap / WORD_STRIDE)
                    .map(|step| buffer.word_at(last + step * WORD_STRIDE))
                    .collect()
            } else {
                Vec::new()
            };

            let mergeable = !fill.is_empty()
                && block.words.len() + fill.len() <= MAX_BLOCK_WORDS
                && !fill.contains(&SYNC_WORD);

            if mergeable {
                block.words.extend(fill);
            } else {
                block.flush(&mut out);
                block = PendingBlock::new(word.address, word.data);
                blocks += 1;
            }
            last = word.address;
        }
        block.flush(&mut out);

        tracing::trace!(blocks, bytes = out.len(), "Encoded export update");
        buffer.clear_dirty();
        Bytes::from(out)
    }

    fn mark_autosync(&mut self, buffer: &mut ExportBuffer) {
        let len = buffer.len();
        if len == 0 {
            return;
        }
        if self.autosync_index >= len {
            self.autosync_index = 0;
        }
        for _ in 0..self.config.autosync_per_update.min(len) {
            buffer.mark_dirty_at(self.autosync_index);
            self.autosync_index = (self.autosync_index + 1) % len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::{encode_block, BlockHeader};
    use crate::protocol::{ExportDecoder, ExportEvent};

    fn expected(blocks: &[(u16, &[u16])]) -> Vec<u8> {
        let mut out = SYNC_SEQUENCE.to_vec();
        for (address, words) in blocks {
            out.extend(encode_block(*address, words));
        }
        out
    }

    #[test]
    fn test_nothing_dirty() {
        let mut buffer = ExportBuffer::new();
        let mut encoder = ExportEncoder::with_config(EncoderConfig::minimal());

        assert!(encoder.update(&mut buffer).is_empty());

        buffer.set_word(0x10, 1);
        buffer.clear_dirty();
        assert!(encoder.update(&mut buffer).is_empty());
    }

    #[test]
    fn test_adjacent_words_share_block() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x10, 1);
        buffer.set_word(0x12, 2);
        let mut encoder = ExportEncoder::with_config(EncoderConfig::minimal());

        let stream = encoder.update(&mut buffer);

        assert_eq!(&stream[..], &expected(&[(0x10, &[1, 2])])[..]);
        assert_eq!(buffer.dirty_count(), 0);
    }

    #[test]
    fn test_small_gap_filled_from_buffer() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x12, 9);
        buffer.clear_dirty();
        buffer.set_word(0x10, 1);
        buffer.set_word(0x14, 3);
        let mut encoder = ExportEncoder::with_config(EncoderConfig::minimal());

        let stream = encoder.update(&mut buffer);

        assert_eq!(&stream[..], &expected(&[(0x10, &[1, 9, 3])])[..]);
    }

    #[test]
    fn test_large_gap_starts_new_block() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x10, 1);
        buffer.set_word(0x18, 2);
        let mut encoder = ExportEncoder::with_config(EncoderConfig::minimal());

        let stream = encoder.update(&mut buffer);

        assert_eq!(&stream[..], &expected(&[(0x10, &[1]), (0x18, &[2])])[..]);
    }

    #[test]
    fn test_sync_valued_word_starts_new_block() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x10, 0x5555);
        buffer.set_word(0x12, 0x5555);
        let mut encoder = ExportEncoder::with_config(EncoderConfig::minimal());

        let stream = encoder.update(&mut buffer);

        assert_eq!(
            &stream[..],
            &expected(&[(0x10, &[0x5555]), (0x12, &[0x5555])])[..]
        );
        let events = ExportDecoder::new().push(&stream);
        assert_eq!(events.iter().filter(|e| e.is_boundary()).count(), 1);
    }

    #[test]
    fn test_long_block_after_sync_word() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x0000, SYNC_WORD);
        buffer.set_word(0x0002, 0x0055);
        for i in 2..10_900u16 {
            buffer.set_word(i * 2, i);
        }
        let source = buffer.clone();
        let mut encoder = ExportEncoder::with_config(EncoderConfig::minimal());

        let stream = encoder.update(&mut buffer);

        let count = BlockHeader::decode(&stream[SYNC_SEQUENCE.len()..]).unwrap().byte_count;
        assert_eq!(count as usize, MAX_BLOCK_WORDS * 2);
        assert!(count >> 8 < u16::from(SYNC_BYTE));

        let mut mirror = ExportBuffer::new();
        let events = ExportDecoder::new().push(&stream);
        for event in &events {
            if let ExportEvent::WordUpdate { address, data } = *event {
                mirror.set_word(address, data);
            }
        }
        assert_eq!(events.iter().filter(|e| e.is_boundary()).count(), 1);
        assert_eq!(mirror.len(), source.len());
        for word in source.iter() {
            assert_eq!(mirror.word_at(word.address), word.data);
        }
    }

    #[test]
    fn test_end_of_update_word_always_sent() {
        let mut buffer = ExportBuffer::new();
        let config = EncoderConfig {
            autosync_per_update: 0,
            ..Default::default()
        };
        let mut encoder = ExportEncoder::with_config(config);

        let stream = encoder.update(&mut buffer);
        assert_eq!(&stream[..], &expected(&[(0xFFFE, &[0])])[..]);

        let stream = encoder.update(&mut buffer);
        assert_eq!(&stream[..], &expected(&[(0xFFFE, &[0])])[..]);
    }

    #[test]
    fn test_autosync_round_robin() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x10, 1);
        buffer.set_word(0x20, 2);
        buffer.set_word(0x30, 3);
        buffer.clear_dirty();
        let config = EncoderConfig {
            autosync_per_update: 2,
            end_of_update_address: None,
            ..Default::default()
        };
        let mut encoder = ExportEncoder::with_config(config);

        let first = encoder.update(&mut buffer);
        assert_eq!(&first[..], &expected(&[(0x10, &[1]), (0x20, &[2])])[..]);

        let second = encoder.update(&mut buffer);
        assert_eq!(&second[..], &expected(&[(0x10, &[1]), (0x30, &[3])])[..]);
    }

    #[test]
    fn test_decodes_back_into_mirror() {
        let mut source = ExportBuffer::new();
        for (i, address) in (0x1000u16..0x1040).step_by(6).enumerate() {
            source.set_word(address, 0x0101 * i as u16);
        }
        source.set_word(0x2000, 0x5555);
        let mut encoder = ExportEncoder::new();

        let stream = encoder.update(&mut source);

        let mut mirror = ExportBuffer::new();
        ExportDecoder::new().feed(&stream, &mut mirror);
        for word in source.iter() {
            assert_eq!(mirror.word_at(word.address), word.data);
        }
        assert_eq!(
            ExportDecoder::new().push(&stream).first(),
            Some(&ExportEvent::FrameBoundary)
        );
    }

    #[test]
    fn test_config_deserialize() {
        let config: EncoderConfig = serde_json::from_str(r#"{"merge_gap": 2}"#).unwrap();
        assert_eq!(config.merge_gap, 2);
        assert_eq!(config.autosync_per_update, 5);
        assert_eq!(config.end_of_update_address, Some(0xFFFE));
    }
}
