//! Live session over one export stream connection.
//!
//! A [`Session`] owns the decoder and dispatcher of a single connection. The
//! caller establishes the transport and hands over any `AsyncRead`; the
//! session reads until end of stream, decoding and dispatching as it goes.
//!
//! # Example
//!
//! ```ignore
//! use export_stream::session::Session;
//! use export_stream::view::{IntegerOutput, IntegerView};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:7778").await?;
//!
//!     let mut session = Session::builder().mirror(true).build();
//!     let gear = IntegerView::with_callback(
//!         &session.dispatcher(),
//!         IntegerOutput::with_mask(0x1026, 0x0100, 8),
//!         |value| println!("gear lever: {}", value),
//!     )?;
//!
//!     session.run(stream).await?;
//!     drop(gear);
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::buffer::ExportBuffer;
use crate::dispatch::UpdateDispatcher;
use crate::error::{ExportError, Result};
use crate::protocol::{DecoderConfig, EventSink, ExportDecoder};

/// Default read buffer size (64 KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Builder for configuring and creating a session.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    decoder_config: DecoderConfig,
    read_buffer_size: usize,
    mirror: bool,
}

impl SessionBuilder {
    /// Create a new session builder.
    pub fn new() -> Self {
        Self {
            decoder_config: DecoderConfig::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            mirror: false,
        }
    }

    /// Set the decoder configuration.
    pub fn decoder_config(mut self, config: DecoderConfig) -> Self {
        self.decoder_config = config;
        self
    }

    /// Set the size of the buffer used for each read.
    ///
    /// Default: 64 KB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Keep a mirror of the export memory and publish a copy at every
    /// frame boundary.
    ///
    /// Default: off
    pub fn mirror(mut self, enabled: bool) -> Self {
        self.mirror = enabled;
        self
    }

    /// Build the session.
    pub fn build(self) -> Session {
        let mirror = self.mirror.then(|| {
            let (frames, _) = watch::channel(Arc::new(ExportBuffer::new()));
            Mirror {
                buffer: ExportBuffer::new(),
                frames,
            }
        });

        Session {
            decoder: ExportDecoder::with_config(self.decoder_config),
            dispatcher: UpdateDispatcher::new(),
            mirror,
            stats: Arc::new(SessionStats::default()),
            read_buffer_size: self.read_buffer_size,
        }
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one session, shareable across tasks.
#[derive(Debug, Default)]
pub struct SessionStats {
    bytes: AtomicU64,
    word_updates: AtomicU64,
    frame_boundaries: AtomicU64,
}

impl SessionStats {
    /// Read all counters.
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            bytes: self.bytes.load(Ordering::Relaxed),
            word_updates: self.word_updates.load(Ordering::Relaxed),
            frame_boundaries: self.frame_boundaries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatsSnapshot {
    /// Bytes fed to the decoder.
    pub bytes: u64,
    /// Word updates decoded.
    pub word_updates: u64,
    /// Frame boundaries detected.
    pub frame_boundaries: u64,
}

struct Mirror {
    buffer: ExportBuffer,
    frames: watch::Sender<Arc<ExportBuffer>>,
}

/// Routes decoder events to the mirror, the counters and the dispatcher.
struct SessionSink<'a> {
    dispatcher: &'a UpdateDispatcher,
    mirror: Option<&'a mut Mirror>,
    stats: &'a SessionStats,
}

impl EventSink for SessionSink<'_> {
    fn word_update(&mut self, address: u16, data: u16) {
        self.stats.word_updates.fetch_add(1, Ordering::Relaxed);
        if let Some(mirror) = self.mirror.as_deref_mut() {
            mirror.buffer.set_word(address, data);
        }
        self.dispatcher.dispatch_word(address, data);
    }

    fn frame_boundary(&mut self) {
        self.stats.frame_boundaries.fetch_add(1, Ordering::Relaxed);
        if let Some(mirror) = self.mirror.as_deref_mut() {
            mirror.frames.send_replace(Arc::new(mirror.buffer.clone()));
            mirror.buffer.clear_dirty();
        }
        self.dispatcher.dispatch_boundary();
    }
}

/// One decoder and one dispatcher for a single connection.
pub struct Session {
    decoder: ExportDecoder,
    dispatcher: UpdateDispatcher,
    mirror: Option<Mirror>,
    stats: Arc<SessionStats>,
    read_buffer_size: usize,
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Create a session with default settings.
    pub fn new() -> Self {
        SessionBuilder::new().build()
    }

    /// Handle for subscribing to this session's updates.
    pub fn dispatcher(&self) -> UpdateDispatcher {
        self.dispatcher.clone()
    }

    /// Get the decoder.
    pub fn decoder(&self) -> &ExportDecoder {
        &self.decoder
    }

    /// Decode a chunk of the stream and dispatch the resulting events.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.stats
            .bytes
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);

        let mut sink = SessionSink {
            dispatcher: &self.dispatcher,
            mirror: self.mirror.as_mut(),
            stats: &self.stats,
        };
        self.decoder.feed(chunk, &mut sink);
    }

    /// Read from `reader` until end of stream.
    ///
    /// Returns `Ok(())` when the stream closes. The session keeps its
    /// decoder state and may be run again on a new reader.
    pub async fn run<R: AsyncRead + Unpin>(&mut self, mut reader: R) -> Result<()> {
        let mut buf = vec![0u8; self.read_buffer_size];
        tracing::debug!("Export stream session started");

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    let stats = self.stats.snapshot();
                    tracing::debug!(
                        bytes = stats.bytes,
                        word_updates = stats.word_updates,
                        frame_boundaries = stats.frame_boundaries,
                        "Export stream closed"
                    );
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("Export stream read error: {}", e);
                    return Err(ExportError::Io(e));
                }
            };

            self.feed(&buf[..n]);
        }
    }

    /// Run the session on its own task, handing it back when the stream ends.
    pub fn spawn<R>(mut self, reader: R) -> JoinHandle<(Session, Result<()>)>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let result = self.run(reader).await;
            (self, result)
        })
    }

    /// Get current counters.
    pub fn stats(&self) -> SessionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared handle to the counters.
    pub fn stats_handle(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    /// Current export memory, if mirroring is enabled.
    pub fn mirror(&self) -> Option<&ExportBuffer> {
        self.mirror.as_ref().map(|mirror| &mirror.buffer)
    }

    /// Receiver for the memory copy published at each frame boundary, if
    /// mirroring is enabled.
    pub fn frames(&self) -> Option<watch::Receiver<Arc<ExportBuffer>>> {
        self.mirror.as_ref().map(|mirror| mirror.frames.subscribe())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.decoder.state())
            .field("dispatcher", &self.dispatcher)
            .field("mirror", &self.mirror.is_some())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
