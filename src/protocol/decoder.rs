//! Byte-at-a-time decoder for the export stream.
//!
//! Implements the parsing state machine together with the resynchronization
//! monitor that watches every byte for a run of four sync bytes:
//! - `WaitForSync`: ignore everything until a sync run
//! - `AddressLow` / `AddressHigh`: block start address
//! - `CountLow` / `CountHigh`: block byte count
//! - `DataLow` / `DataHigh`: one data word, then loop or next block
//!
//! The decoder never fails. Corrupt input is recovered from silently at the
//! next sync run.
//!
//! # Example
//!
//! ```
//! use export_stream::protocol::{ExportDecoder, ExportEvent};
//!
//! let mut decoder = ExportDecoder::new();
//! let events = decoder.push(&[0x55, 0x55, 0x55, 0x55, 0x10, 0x00, 0x02, 0x00, 0x34, 0x12]);
//!
//! assert_eq!(
//!     events,
//!     vec![
//!         ExportEvent::FrameBoundary,
//!         ExportEvent::WordUpdate { address: 0x0010, data: 0x1234 },
//!     ]
//! );
//! ```

use serde::Deserialize;

use super::wire_format::{EMBEDDED_SYNC_ADDRESS, SYNC_BYTE, SYNC_RUN_LENGTH, WORD_STRIDE};

/// Parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderState {
    /// Waiting for a sync run; all bytes are ignored.
    WaitForSync,
    /// Expecting the low byte of a block address.
    AddressLow,
    /// Expecting the high byte of a block address.
    AddressHigh,
    /// Expecting the low byte of the block byte count.
    CountLow,
    /// Expecting the high byte of the block byte count.
    CountHigh,
    /// Expecting the low byte of a data word.
    DataLow,
    /// Expecting the high byte of a data word.
    DataHigh,
}

/// Event produced by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportEvent {
    /// A complete 16-bit word was written to `address`.
    WordUpdate {
        /// Word address.
        address: u16,
        /// New value.
        data: u16,
    },
    /// A sync run was seen; every address has been refreshed at least once.
    FrameBoundary,
}

impl ExportEvent {
    /// Check if this is a frame boundary.
    #[inline]
    pub fn is_boundary(&self) -> bool {
        matches!(self, ExportEvent::FrameBoundary)
    }

    /// Address of a word update, `None` for boundaries.
    #[inline]
    pub fn address(&self) -> Option<u16> {
        match self {
            ExportEvent::WordUpdate { address, .. } => Some(*address),
            ExportEvent::FrameBoundary => None,
        }
    }
}

/// Receiver of decoder events.
///
/// Events are delivered synchronously, in stream order, from inside
/// [`ExportDecoder::process_byte`].
pub trait EventSink {
    /// A complete word was decoded.
    fn word_update(&mut self, address: u16, data: u16);

    /// A frame boundary was detected.
    fn frame_boundary(&mut self);
}

impl EventSink for Vec<ExportEvent> {
    fn word_update(&mut self, address: u16, data: u16) {
        self.push(ExportEvent::WordUpdate { address, data });
    }

    fn frame_boundary(&mut self) {
        self.push(ExportEvent::FrameBoundary);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn word_update(&mut self, address: u16, data: u16) {
        (**self).word_update(address, data);
    }

    fn frame_boundary(&mut self) {
        (**self).frame_boundary();
    }
}

/// Decoder behaviour switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Emit a frame boundary when an address field reads 0x5555.
    ///
    /// Off by default: the embedded marker then only drops back to
    /// `WaitForSync`. When on, the marker and the sync run it belongs to
    /// report a single boundary between them.
    pub embedded_sync_emits_boundary: bool,

    /// Treat a word written to this address as the end of an update.
    ///
    /// The decoder emits a frame boundary once the block holding that word
    /// is complete, before parsing the next header.
    pub end_of_update_address: Option<u16>,
}

/// Streaming decoder for the export stream.
///
/// Owns the address, count and data registers of one connection. Feed bytes
/// strictly in arrival order; chunking carries no meaning.
#[derive(Debug, Clone)]
pub struct ExportDecoder {
    /// Current parsing state.
    state: DecoderState,
    /// Address register; advances by one word after every emitted update.
    address: u16,
    /// Remaining data bytes in the current block.
    remaining: u16,
    /// Staging buffer for the word being assembled.
    data_word: [u8; 2],
    /// Consecutive sync bytes seen so far.
    sync_run: u8,
    /// The embedded marker already reported a boundary for the current run.
    boundary_in_run: bool,
    /// End-of-update word seen mid-block; report at the end of the block.
    end_of_update_pending: bool,
    config: DecoderConfig,
}

impl ExportDecoder {
    /// Create a decoder with default settings, waiting for the first sync run.
    pub fn new() -> Self {
        Self::with_config(DecoderConfig::default())
    }

    /// Create a decoder with custom settings.
    pub fn with_config(config: DecoderConfig) -> Self {
        Self {
            state: DecoderState::WaitForSync,
            address: 0,
            remaining: 0,
            data_word: [0; 2],
            sync_run: 0,
            boundary_in_run: false,
            end_of_update_pending: false,
            config,
        }
    }

    /// Process a single byte, delivering any resulting events to `sink`.
    ///
    /// Total over every byte in every state.
    pub fn process_byte<S: EventSink + ?Sized>(&mut self, byte: u8, sink: &mut S) {
        match self.state {
            DecoderState::WaitForSync => {}

            DecoderState::AddressLow => {
                self.address = (self.address & 0xFF00) | u16::from(byte);
                self.state = DecoderState::AddressHigh;
            }

            DecoderState::AddressHigh => {
                self.address = (self.address & 0x00FF) | (u16::from(byte) << 8);
                if self.address != EMBEDDED_SYNC_ADDRESS {
                    self.state = DecoderState::CountLow;
                } else if self.config.embedded_sync_emits_boundary {
                    self.state = DecoderState::AddressLow;
                    if !self.boundary_in_run {
                        self.boundary_in_run = true;
                        tracing::trace!("Embedded sync marker, frame boundary");
                        sink.frame_boundary();
                    }
                } else {
                    self.state = DecoderState::WaitForSync;
                }
            }

            DecoderState::CountLow => {
                self.remaining = (self.remaining & 0xFF00) | u16::from(byte);
                self.state = DecoderState::CountHigh;
            }

            DecoderState::CountHigh => {
                self.remaining = (self.remaining & 0x00FF) | (u16::from(byte) << 8);
                self.state = DecoderState::DataLow;
            }

            DecoderState::DataLow => {
                self.data_word[0] = byte;
                self.remaining = self.remaining.wrapping_sub(1);
                self.state = DecoderState::DataHigh;
            }

            DecoderState::DataHigh => {
                self.data_word[1] = byte;
                self.remaining = self.remaining.wrapping_sub(1);

                let address = self.address;
                self.address = address.wrapping_add(WORD_STRIDE);
                self.state = if self.remaining == 0 {
                    DecoderState::AddressLow
                } else {
                    DecoderState::DataLow
                };
                sink.word_update(address, u16::from_le_bytes(self.data_word));

                if self.config.end_of_update_address == Some(address) {
                    self.end_of_update_pending = true;
                }
                if self.remaining == 0 && self.end_of_update_pending {
                    self.end_of_update_pending = false;
                    tracing::trace!("End of update, frame boundary");
                    sink.frame_boundary();
                }
            }
        }

        if byte == SYNC_BYTE {
            self.sync_run += 1;
        } else {
            self.sync_run = 0;
            self.boundary_in_run = false;
        }

        if self.sync_run == SYNC_RUN_LENGTH {
            if !matches!(
                self.state,
                DecoderState::WaitForSync | DecoderState::AddressLow | DecoderState::AddressHigh
            ) {
                tracing::debug!(
                    state = ?self.state,
                    address = self.address,
                    "Sync run interrupted a block"
                );
            }
            self.state = DecoderState::AddressLow;
            self.sync_run = 0;
            self.end_of_update_pending = false;
            if self.boundary_in_run {
                self.boundary_in_run = false;
            } else {
                tracing::trace!("Sync run, frame boundary");
                sink.frame_boundary();
            }
        }
    }

    /// Process a chunk of bytes in order.
    pub fn feed<S: EventSink + ?Sized>(&mut self, data: &[u8], sink: &mut S) {
        for &byte in data {
            self.process_byte(byte, sink);
        }
    }

    /// Process a chunk of bytes and collect the resulting events.
    pub fn push(&mut self, data: &[u8]) -> Vec<ExportEvent> {
        let mut events = Vec::new();
        self.feed(data, &mut events);
        events
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Get the address register.
    #[inline]
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Get the remaining byte count of the current block.
    #[inline]
    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    /// Get the configuration.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Forget all progress and wait for the next sync run.
    pub fn reset(&mut self) {
        self.state = DecoderState::WaitForSync;
        self.address = 0;
        self.remaining = 0;
        self.data_word = [0; 2];
        self.sync_run = 0;
        self.boundary_in_run = false;
        self.end_of_update_pending = false;
    }
}

impl Default for ExportDecoder {
    fn default() -> Self {
        Self::new()
    }
}
