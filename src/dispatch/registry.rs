//! Listener registry for dispatching decoded updates by address.
//!
//! Word listeners are keyed by an exact 16-bit address; boundary listeners
//! receive every frame boundary. Several listeners may share an address and
//! are called in registration order.
//!
//! Each dispatch works on a snapshot of the listener list taken when the
//! dispatch starts, so a callback may subscribe or unsubscribe (itself or
//! others) and the change applies from the next event on.
//!
//! # Example
//!
//! ```
//! use export_stream::dispatch::UpdateDispatcher;
//!
//! let dispatcher = UpdateDispatcher::new();
//!
//! let id = dispatcher.subscribe(0x1010, |address, data| {
//!     println!("{:#06x} = {:#06x}", address, data);
//! });
//!
//! dispatcher.dispatch_word(0x1010, 0x0001);
//! assert!(dispatcher.unsubscribe(id));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::EventSink;

/// Callback invoked with `(address, data)` for each matching word update.
pub type WordCallback = Arc<dyn Fn(u16, u16) + Send + Sync>;

/// Callback invoked once per frame boundary.
pub type BoundaryCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by the subscribe methods, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Registered word listener.
struct WordEntry {
    id: SubscriptionId,
    address: u16,
    callback: WordCallback,
}

/// Registered boundary listener.
struct BoundaryEntry {
    id: SubscriptionId,
    callback: BoundaryCallback,
}

#[derive(Default)]
struct Listeners {
    words: Vec<WordEntry>,
    boundaries: Vec<BoundaryEntry>,
}

#[derive(Default)]
struct Inner {
    listeners: Mutex<Listeners>,
    next_id: AtomicU64,
}

/// Registry mapping addresses to word listeners, plus boundary listeners.
///
/// Cheaply cloneable; all clones share the same registry. Holds no state
/// besides the listeners themselves.
#[derive(Clone, Default)]
pub struct UpdateDispatcher {
    inner: Arc<Inner>,
}

impl UpdateDispatcher {
    /// Create a new empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        // Never held while a callback runs.
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a word listener for an exact address.
    pub fn subscribe<F>(&self, address: u16, callback: F) -> SubscriptionId
    where
        F: Fn(u16, u16) + Send + Sync + 'static,
    {
        self.subscribe_shared(address, Arc::new(callback))
    }

    /// Register an already shared word listener for an exact address.
    ///
    /// Lets one callback serve several addresses; each registration gets its
    /// own id.
    pub fn subscribe_shared(&self, address: u16, callback: WordCallback) -> SubscriptionId {
        let id = self.next_id();
        self.listeners().words.push(WordEntry {
            id,
            address,
            callback,
        });
        id
    }

    /// Remove a word listener.
    ///
    /// Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.words.len();
        listeners.words.retain(|entry| entry.id != id);
        listeners.words.len() != before
    }

    /// Register a frame boundary listener.
    pub fn subscribe_boundary<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.listeners().boundaries.push(BoundaryEntry {
            id,
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove a frame boundary listener.
    ///
    /// Returns `false` if the id was not registered.
    pub fn unsubscribe_boundary(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.boundaries.len();
        listeners.boundaries.retain(|entry| entry.id != id);
        listeners.boundaries.len() != before
    }

    /// Deliver a word update to every listener registered for `address`.
    pub fn dispatch_word(&self, address: u16, data: u16) {
        let snapshot: Vec<WordCallback> = self
            .listeners()
            .words
            .iter()
            .filter(|entry| entry.address == address)
            .map(|entry| entry.callback.clone())
            .collect();

        for callback in snapshot {
            callback(address, data);
        }
    }

    /// Deliver a frame boundary to every boundary listener.
    pub fn dispatch_boundary(&self) {
        let snapshot: Vec<BoundaryCallback> = self
            .listeners()
            .boundaries
            .iter()
            .map(|entry| entry.callback.clone())
            .collect();

        tracing::trace!(listeners = snapshot.len(), "Dispatching frame boundary");
        for callback in snapshot {
            callback();
        }
    }

    /// Number of registered word listeners.
    pub fn subscriber_count(&self) -> usize {
        self.listeners().words.len()
    }

    /// Number of registered boundary listeners.
    pub fn boundary_listener_count(&self) -> usize {
        self.listeners().boundaries.len()
    }

    /// Check whether any word listener is registered for `address`.
    pub fn is_subscribed(&self, address: u16) -> bool {
        self.listeners()
            .words
            .iter()
            .any(|entry| entry.address == address)
    }
}

impl EventSink for UpdateDispatcher {
    fn word_update(&mut self, address: u16, data: u16) {
        self.dispatch_word(address, data);
    }

    fn frame_boundary(&mut self) {
        self.dispatch_boundary();
    }
}

impl std::fmt::Debug for UpdateDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners();
        f.debug_struct("UpdateDispatcher")
            .field("word_listeners", &listeners.words.len())
            .field("boundary_listeners", &listeners.boundaries.len())
            .finish()
    }
}
