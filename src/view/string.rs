//! String view assembled from a contiguous run of export words.
//!
//! Words for one string may arrive in any order within an update, so the view
//! only buffers them and publishes at the next frame boundary.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::Deserialize;

use super::lock;
use crate::dispatch::{SubscriptionId, UpdateDispatcher, WordCallback};
use crate::error::{ExportError, Result};
use crate::protocol::WORD_STRIDE;

/// Location of a string value: `max_length` bytes starting at `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StringOutput {
    /// Address of the word holding the first two characters.
    #[serde(alias = "base_address")]
    pub address: u16,
    /// Maximum length in bytes.
    pub max_length: u16,
}

impl StringOutput {
    /// Create a string output.
    pub fn new(address: u16, max_length: u16) -> Self {
        Self {
            address,
            max_length,
        }
    }

    /// Check that the string is non-empty and fits in the address space.
    pub fn validate(&self) -> Result<()> {
        if self.max_length == 0 {
            return Err(ExportError::InvalidOutput(format!(
                "String at {:#06x} has zero length",
                self.address
            )));
        }
        if u32::from(self.address) + u32::from(self.max_length) > 0x1_0000 {
            return Err(ExportError::InvalidOutput(format!(
                "String at {:#06x} with length {} runs past the address space",
                self.address, self.max_length
            )));
        }
        Ok(())
    }

    /// Addresses of the words that make up the string.
    pub fn addresses(&self) -> impl Iterator<Item = u16> {
        let base = self.address;
        (0..self.max_length)
            .step_by(WORD_STRIDE as usize)
            .map(move |offset| base.wrapping_add(offset))
    }
}

/// The bytes before the first NUL, or all of them.
pub(crate) fn terminated(buf: &[u8]) -> &[u8] {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    &buf[..end]
}

struct StringState {
    /// One byte per character slot.
    buffer: Vec<u8>,
    /// Written since the last boundary.
    changed: bool,
    /// Last published value.
    latest: Option<Bytes>,
}

/// Live string value.
///
/// Subscribes every word in `[address, address + max_length)` and publishes a
/// null-terminated snapshot at each frame boundary that follows a write.
/// Unsubscribes on drop.
pub struct StringView {
    output: StringOutput,
    dispatcher: UpdateDispatcher,
    words: Vec<SubscriptionId>,
    boundary: SubscriptionId,
    state: Arc<Mutex<StringState>>,
}

impl StringView {
    /// Subscribe a view for `output`.
    pub fn new(dispatcher: &UpdateDispatcher, output: StringOutput) -> Result<Self> {
        Self::attach(dispatcher, output, None)
    }

    /// Subscribe a view that also calls `on_publish` with each published value.
    pub fn with_callback<F>(
        dispatcher: &UpdateDispatcher,
        output: StringOutput,
        on_publish: F,
    ) -> Result<Self>
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        Self::attach(dispatcher, output, Some(Box::new(on_publish)))
    }

    fn attach(
        dispatcher: &UpdateDispatcher,
        output: StringOutput,
        on_publish: Option<Box<dyn Fn(&Bytes) + Send + Sync>>,
    ) -> Result<Self> {
        output.validate()?;

        let max_length = usize::from(output.max_length);
        let state = Arc::new(Mutex::new(StringState {
            buffer: vec![0; max_length],
            changed: false,
            latest: None,
        }));

        let word_state = state.clone();
        let base = output.address;
        let on_word: WordCallback = Arc::new(move |address: u16, data: u16| {
            let offset = usize::from(address.wrapping_sub(base));
            if offset >= max_length {
                return;
            }
            let [low, high] = data.to_le_bytes();
            let mut state = lock(&word_state);
            state.buffer[offset] = low;
            if offset + 1 < max_length {
                state.buffer[offset + 1] = high;
            }
            state.changed = true;
        });

        let words = output
            .addresses()
            .map(|address| dispatcher.subscribe_shared(address, on_word.clone()))
            .collect();

        let boundary_state = state.clone();
        let boundary = dispatcher.subscribe_boundary(move || {
            let published = {
                let mut state = lock(&boundary_state);
                if !state.changed {
                    return;
                }
                state.changed = false;
                let value = Bytes::copy_from_slice(terminated(&state.buffer));
                state.latest = Some(value.clone());
                value
            };
            if let Some(on_publish) = &on_publish {
                on_publish(&published);
            }
        });

        Ok(Self {
            output,
            dispatcher: dispatcher.clone(),
            words,
            boundary,
            state,
        })
    }

    /// Last published value, `None` before the first publication.
    pub fn value(&self) -> Option<Bytes> {
        lock(&self.state).latest.clone()
    }

    /// Last published value decoded as text, replacing invalid UTF-8.
    pub fn value_lossy(&self) -> Option<String> {
        self.value()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Check if a value has been published.
    pub fn has_value(&self) -> bool {
        lock(&self.state).latest.is_some()
    }

    /// Check if words were written since the last boundary.
    pub fn is_pending(&self) -> bool {
        lock(&self.state).changed
    }

    /// Get the output this view follows.
    pub fn output(&self) -> &StringOutput {
        &self.output
    }
}

impl Drop for StringView {
    fn drop(&mut self) {
        for id in &self.words {
            self.dispatcher.unsubscribe(*id);
        }
        self.dispatcher.unsubscribe_boundary(self.boundary);
    }
}

impl std::fmt::Debug for StringView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringView")
            .field("output", &self.output)
            .field("value", &self.value())
            .finish()
    }
}
