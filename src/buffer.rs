//! Mirror of the export memory.
//!
//! [`ExportBuffer`] keeps the last value of every word seen so far, ordered by
//! address, with a dirty flag per word. It can be fed straight from the
//! decoder (it is an [`EventSink`]) and is the input of the
//! [`ExportEncoder`](crate::protocol::ExportEncoder).
//!
//! # Example
//!
//! ```
//! use export_stream::buffer::ExportBuffer;
//! use export_stream::view::{IntegerOutput, StringOutput};
//!
//! let mut buffer = ExportBuffer::new();
//! buffer.set_cstring(&StringOutput::new(0x1000, 4), "AB");
//! buffer.set_integer(&IntegerOutput::with_mask(0x1004, 0x0300, 8), 2).unwrap();
//!
//! assert_eq!(buffer.cstring(&StringOutput::new(0x1000, 4)), b"AB  ");
//! assert_eq!(buffer.word_at(0x1004), 0x0200);
//! ```

use crate::error::{ExportError, Result};
use crate::protocol::{EventSink, WORD_STRIDE};
use crate::view::{IntegerOutput, StringOutput};

/// One word of export memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataWord {
    /// Word address.
    pub address: u16,
    /// Current value.
    pub data: u16,
    /// Changed since dirty flags were last cleared.
    pub dirty: bool,
}

/// Address-ordered store of export words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportBuffer {
    words: Vec<DataWord>,
}

impl ExportBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, address: u16) -> std::result::Result<usize, usize> {
        self.words.binary_search_by_key(&address, |word| word.address)
    }

    /// Store a word. Marks it dirty if it is new or its value changed.
    pub fn set_word(&mut self, address: u16, data: u16) {
        match self.index_of(address) {
            Ok(index) => {
                let word = &mut self.words[index];
                if word.data != data {
                    word.data = data;
                    word.dirty = true;
                }
            }
            Err(index) => self.words.insert(
                index,
                DataWord {
                    address,
                    data,
                    dirty: true,
                },
            ),
        }
    }

    /// Value at `address`, 0 if never written.
    pub fn word_at(&self, address: u16) -> u16 {
        self.get(address).map_or(0, |word| word.data)
    }

    /// Entry at `address`.
    pub fn get(&self, address: u16) -> Option<DataWord> {
        self.index_of(address).ok().map(|index| self.words[index])
    }

    /// Mark a word dirty, creating it with value 0 if absent.
    pub fn mark_dirty(&mut self, address: u16) {
        match self.index_of(address) {
            Ok(index) => self.words[index].dirty = true,
            Err(index) => self.words.insert(
                index,
                DataWord {
                    address,
                    data: 0,
                    dirty: true,
                },
            ),
        }
    }

    pub(crate) fn mark_dirty_at(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index) {
            word.dirty = true;
        }
    }

    /// Clear every dirty flag.
    pub fn clear_dirty(&mut self) {
        for word in &mut self.words {
            word.dirty = false;
        }
    }

    /// Number of dirty words.
    pub fn dirty_count(&self) -> usize {
        self.words.iter().filter(|word| word.dirty).count()
    }

    /// Iterate over all words in address order.
    pub fn iter(&self) -> impl Iterator<Item = &DataWord> {
        self.words.iter()
    }

    pub(crate) fn words(&self) -> &[DataWord] {
        &self.words
    }

    /// Number of stored words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if no word has been stored.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Remove every word.
    pub fn reset(&mut self) {
        self.words.clear();
    }

    /// Current value of an integer output.
    pub fn integer(&self, output: &IntegerOutput) -> u16 {
        output.extract(self.word_at(output.address))
    }

    /// Store an integer value into its sub-field, keeping the other bits.
    pub fn set_integer(&mut self, output: &IntegerOutput, value: u16) -> Result<()> {
        output.validate()?;
        if value > output.max_value() {
            return Err(ExportError::InvalidOutput(format!(
                "Value {} exceeds maximum {} for integer at {:#06x}",
                value,
                output.max_value(),
                output.address
            )));
        }
        let word = self.word_at(output.address);
        let word = (word & !output.mask) | ((value << output.shift) & output.mask);
        self.set_word(output.address, word);
        Ok(())
    }

    /// Current value of a string output, up to the first NUL.
    pub fn cstring(&self, output: &StringOutput) -> Vec<u8> {
        let mut data = Vec::with_capacity(usize::from(output.max_length));
        let mut address = output.address;
        'words: while data.len() < usize::from(output.max_length) {
            for byte in self.word_at(address).to_le_bytes() {
                if byte == 0 || data.len() == usize::from(output.max_length) {
                    break 'words;
                }
                data.push(byte);
            }
            address = address.wrapping_add(WORD_STRIDE);
        }
        data
    }

    /// Store a string value, truncated or padded with spaces to `max_length`.
    pub fn set_cstring(&mut self, output: &StringOutput, value: &str) {
        let max_length = usize::from(output.max_length);
        let mut bytes = value.as_bytes().to_vec();
        bytes.truncate(max_length);
        bytes.resize(max_length, b' ');

        let mut address = output.address;
        for pair in bytes.chunks(2) {
            let mut word = self.word_at(address).to_le_bytes();
            word[..pair.len()].copy_from_slice(pair);
            self.set_word(address, u16::from_le_bytes(word));
            address = address.wrapping_add(WORD_STRIDE);
        }
    }
}

impl EventSink for ExportBuffer {
    fn word_update(&mut self, address: u16, data: u16) {
        self.set_word(address, data);
    }

    fn frame_boundary(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_word_keeps_order() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x30, 3);
        buffer.set_word(0x10, 1);
        buffer.set_word(0x20, 2);

        let addresses: Vec<u16> = buffer.iter().map(|w| w.address).collect();
        assert_eq!(addresses, vec![0x10, 0x20, 0x30]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_dirty_only_on_change() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x10, 1);
        assert_eq!(buffer.dirty_count(), 1);

        buffer.clear_dirty();
        buffer.set_word(0x10, 1);
        assert_eq!(buffer.dirty_count(), 0);

        buffer.set_word(0x10, 2);
        assert!(buffer.get(0x10).unwrap().dirty);
    }

    #[test]
    fn test_word_at_missing_is_zero() {
        let buffer = ExportBuffer::new();
        assert_eq!(buffer.word_at(0x1234), 0);
        assert!(buffer.get(0x1234).is_none());
    }

    #[test]
    fn test_mark_dirty_creates_word() {
        let mut buffer = ExportBuffer::new();
        buffer.mark_dirty(0xFFFE);

        assert_eq!(
            buffer.get(0xFFFE),
            Some(DataWord {
                address: 0xFFFE,
                data: 0,
                dirty: true
            })
        );
    }

    #[test]
    fn test_integer_round_trip_keeps_other_bits() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x10, 0xFFFF);
        let output = IntegerOutput::with_mask(0x10, 0x0700, 8);

        buffer.set_integer(&output, 5).unwrap();

        assert_eq!(buffer.word_at(0x10), 0xFDFF);
        assert_eq!(buffer.integer(&output), 5);
    }

    #[test]
    fn test_set_integer_rejects_out_of_range() {
        let mut buffer = ExportBuffer::new();
        let output = IntegerOutput::with_mask(0x10, 0x0003, 0);

        assert!(buffer.set_integer(&output, 4).is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_cstring_stops_at_nul() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x20, u16::from_le_bytes(*b"HE"));
        buffer.set_word(0x22, u16::from_le_bytes(*b"Y\0"));
        buffer.set_word(0x24, u16::from_le_bytes(*b"XX"));

        assert_eq!(buffer.cstring(&StringOutput::new(0x20, 6)), b"HEY");
    }

    #[test]
    fn test_cstring_odd_length() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x20, u16::from_le_bytes(*b"AB"));
        buffer.set_word(0x22, u16::from_le_bytes(*b"CD"));

        assert_eq!(buffer.cstring(&StringOutput::new(0x20, 3)), b"ABC");
    }

    #[test]
    fn test_set_cstring_pads_and_truncates() {
        let mut buffer = ExportBuffer::new();
        let output = StringOutput::new(0x20, 5);

        buffer.set_cstring(&output, "ab");
        assert_eq!(buffer.cstring(&output), b"ab   ");

        buffer.set_cstring(&output, "abcdefg");
        assert_eq!(buffer.cstring(&output), b"abcde");
    }

    #[test]
    fn test_set_cstring_odd_length_keeps_high_byte() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x24, 0x7700);

        buffer.set_cstring(&StringOutput::new(0x20, 5), "abcde");

        assert_eq!(buffer.word_at(0x24), 0x7765);
    }

    #[test]
    fn test_event_sink_records_words() {
        let mut buffer = ExportBuffer::new();
        buffer.word_update(0x10, 7);
        buffer.frame_boundary();

        assert_eq!(buffer.word_at(0x10), 7);
    }

    #[test]
    fn test_reset() {
        let mut buffer = ExportBuffer::new();
        buffer.set_word(0x10, 7);
        buffer.reset();

        assert!(buffer.is_empty());
    }
}
