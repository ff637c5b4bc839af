//! Dispatch module - delivery of decoded updates to listeners.
//!
//! Provides [`UpdateDispatcher`], which maps addresses to word listeners and
//! keeps a list of frame boundary listeners. The decoder drives it through
//! the [`EventSink`](crate::protocol::EventSink) trait.

mod registry;

pub use registry::{BoundaryCallback, SubscriptionId, UpdateDispatcher, WordCallback};
