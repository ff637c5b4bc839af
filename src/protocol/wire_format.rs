//! Wire format of the export stream.
//!
//! The stream is a sequence of write blocks, interrupted at any point by a
//! run of four sync bytes:
//! ```text
//! ┌──────────┬────────────┬──────────────────────────┐
//! │ Address  │ Byte count │ Data words               │
//! │ 2 bytes  │ 2 bytes    │ byte count / 2 × 2 bytes │
//! │ uint16 LE│ uint16 LE  │ uint16 LE each           │
//! └──────────┴────────────┴──────────────────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. Consecutive words of one block
//! land on consecutive addresses, two apart.

/// Sync byte. Four in a row mark a frame boundary.
pub const SYNC_BYTE: u8 = 0x55;

/// Number of consecutive sync bytes that form a frame boundary.
pub const SYNC_RUN_LENGTH: u8 = 4;

/// The sync run as it appears on the wire.
pub const SYNC_SEQUENCE: [u8; SYNC_RUN_LENGTH as usize] = [SYNC_BYTE; SYNC_RUN_LENGTH as usize];

/// A data word made of two sync bytes.
pub const SYNC_WORD: u16 = u16::from_le_bytes([SYNC_BYTE, SYNC_BYTE]);

/// An address field with this value is an embedded sync marker, not a block.
pub const EMBEDDED_SYNC_ADDRESS: u16 = 0x5555;

/// Address distance between two consecutive words.
pub const WORD_STRIDE: u16 = 2;

/// Address the simulation host writes last in every update.
pub const END_OF_UPDATE_ADDRESS: u16 = 0xFFFE;

/// Block header size in bytes.
pub const BLOCK_HEADER_SIZE: usize = 4;

/// Header of one write block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Address of the first word in the block.
    pub address: u16,
    /// Number of data bytes that follow (two per word).
    pub byte_count: u16,
}

impl BlockHeader {
    /// Create a new block header.
    pub fn new(address: u16, byte_count: u16) -> Self {
        Self {
            address,
            byte_count,
        }
    }

    /// Header for a block of `words` words starting at `address`.
    pub fn for_words(address: u16, words: usize) -> Self {
        Self::new(address, (words * 2) as u16)
    }

    /// Number of words carried by the block.
    #[inline]
    pub fn word_count(&self) -> u16 {
        self.byte_count / 2
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use export_stream::protocol::BlockHeader;
    ///
    /// let header = BlockHeader::new(0x1010, 4);
    /// assert_eq!(header.encode(), [0x10, 0x10, 0x04, 0x00]);
    /// ```
    pub fn encode(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.address.to_le_bytes());
        buf[2..4].copy_from_slice(&self.byte_count.to_le_bytes());
        buf
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < BLOCK_HEADER_SIZE {
            return None;
        }
        Some(Self {
            address: u16::from_le_bytes([buf[0], buf[1]]),
            byte_count: u16::from_le_bytes([buf[2], buf[3]]),
        })
    }

    /// Check whether this header would be read as an embedded sync marker.
    #[inline]
    pub fn is_embedded_sync(&self) -> bool {
        self.address == EMBEDDED_SYNC_ADDRESS
    }
}

/// Encode one complete block: header followed by the data words.
///
/// # Example
///
/// ```
/// use export_stream::protocol::encode_block;
///
/// let bytes = encode_block(0x0010, &[0x1234, 0x5678]);
/// assert_eq!(bytes, [0x10, 0x00, 0x04, 0x00, 0x34, 0x12, 0x78, 0x56]);
/// ```
pub fn encode_block(address: u16, words: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOCK_HEADER_SIZE + words.len() * 2);
    encode_block_into(address, words, &mut out);
    out
}

/// Append one complete block to `out`.
pub fn encode_block_into(address: u16, words: &[u16], out: &mut Vec<u8>) {
    debug_assert!(words.len() * 2 <= u16::MAX as usize);
    out.extend_from_slice(&BlockHeader::for_words(address, words.len()).encode());
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
}
