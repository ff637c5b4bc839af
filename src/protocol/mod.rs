//! Protocol module - wire format, decoding and encoding of the export stream.
//!
//! This module implements the binary export protocol:
//! - Block header layout and sync constants
//! - Byte-at-a-time decoder with sync-run resynchronization
//! - Encoder turning a memory mirror back into a stream

mod decoder;
mod encoder;
mod wire_format;

pub use decoder::{DecoderConfig, DecoderState, EventSink, ExportDecoder, ExportEvent};
pub use encoder::{EncoderConfig, ExportEncoder};
pub use wire_format::{
    encode_block, encode_block_into, BlockHeader, BLOCK_HEADER_SIZE, EMBEDDED_SYNC_ADDRESS,
    END_OF_UPDATE_ADDRESS, SYNC_BYTE, SYNC_RUN_LENGTH, SYNC_SEQUENCE, SYNC_WORD, WORD_STRIDE,
};
