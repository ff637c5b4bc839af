//! # export-stream
//!
//! Decoder and live-data distribution for flight-simulator export streams.
//!
//! The simulator exports its cockpit state as a 64K-word memory image. Changes
//! are streamed as blocks of consecutive words, and every update starts with a
//! run of sync bytes. This crate turns that byte stream back into per-address
//! word updates and frame boundaries, and delivers them to subscribers.
//!
//! ## Architecture
//!
//! - **Protocol**: wire format, byte-at-a-time decoder and encoder
//! - **Dispatch**: address-keyed listener registry fed by the decoder
//! - **Views**: integer and string values assembled from word updates
//! - **Session**: one decoder and dispatcher reading from any `AsyncRead`
//!
//! ## Example
//!
//! ```ignore
//! use export_stream::view::{StringOutput, StringView};
//! use export_stream::Session;
//!
//! #[tokio::main]
//! async fn main() {
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:7778").await.unwrap();
//!     let mut session = Session::new();
//!
//!     let aircraft = StringView::with_callback(
//!         &session.dispatcher(),
//!         StringOutput::new(0x0000, 24),
//!         |name| println!("aircraft: {}", String::from_utf8_lossy(name)),
//!     )
//!     .unwrap();
//!
//!     session.run(stream).await.unwrap();
//!     drop(aircraft);
//! }
//! ```

pub mod buffer;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod session;
pub mod view;

pub use dispatch::UpdateDispatcher;
pub use error::{ExportError, Result};
pub use protocol::{ExportDecoder, ExportEvent};
pub use session::{Session, SessionBuilder};
pub use view::{IntegerView, StringView};
