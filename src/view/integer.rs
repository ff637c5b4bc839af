//! Integer view over a sub-field of one export word.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use crate::dispatch::{SubscriptionId, UpdateDispatcher};
use crate::error::{ExportError, Result};

/// Mask selecting the whole word.
pub const DEFAULT_MASK: u16 = 0xFFFF;

/// Marks the stored raw word as present.
const HAS_VALUE: u32 = 1 << 16;

fn default_mask() -> u16 {
    DEFAULT_MASK
}

/// Location of an integer value: `(word & mask) >> shift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct IntegerOutput {
    /// Address of the word holding the value.
    pub address: u16,
    /// Bits of interest.
    #[serde(default = "default_mask")]
    pub mask: u16,
    /// Right shift applied after masking.
    #[serde(default, alias = "shift_by")]
    pub shift: u8,
}

impl IntegerOutput {
    /// Whole-word output at `address`.
    pub fn new(address: u16) -> Self {
        Self {
            address,
            mask: DEFAULT_MASK,
            shift: 0,
        }
    }

    /// Sub-field output at `address`.
    pub fn with_mask(address: u16, mask: u16, shift: u8) -> Self {
        Self {
            address,
            mask,
            shift,
        }
    }

    /// Check that the shift stays inside the word.
    pub fn validate(&self) -> Result<()> {
        if self.shift >= 16 {
            return Err(ExportError::InvalidOutput(format!(
                "Shift {} out of range for integer at {:#06x}",
                self.shift, self.address
            )));
        }
        Ok(())
    }

    /// Extract the value from a raw word.
    #[inline]
    pub fn extract(&self, raw: u16) -> u16 {
        (raw & self.mask)
            .checked_shr(u32::from(self.shift))
            .unwrap_or(0)
    }

    /// Largest value the field can hold.
    #[inline]
    pub fn max_value(&self) -> u16 {
        self.extract(u16::MAX)
    }
}

/// Live integer value for one address.
///
/// Updates on every word written to its address; no boundary is needed since
/// a single word is already consistent. Unsubscribes on drop.
pub struct IntegerView {
    output: IntegerOutput,
    dispatcher: UpdateDispatcher,
    subscription: SubscriptionId,
    /// Raw word, with `HAS_VALUE` set once one arrived.
    raw: Arc<AtomicU32>,
}

impl IntegerView {
    /// Subscribe a view for `output`.
    pub fn new(dispatcher: &UpdateDispatcher, output: IntegerOutput) -> Result<Self> {
        Self::attach(dispatcher, output, None)
    }

    /// Subscribe a view that also calls `on_change` with each new value.
    pub fn with_callback<F>(
        dispatcher: &UpdateDispatcher,
        output: IntegerOutput,
        on_change: F,
    ) -> Result<Self>
    where
        F: Fn(u16) + Send + Sync + 'static,
    {
        Self::attach(dispatcher, output, Some(Box::new(on_change)))
    }

    fn attach(
        dispatcher: &UpdateDispatcher,
        output: IntegerOutput,
        on_change: Option<Box<dyn Fn(u16) + Send + Sync>>,
    ) -> Result<Self> {
        output.validate()?;

        let raw = Arc::new(AtomicU32::new(0));
        let slot = raw.clone();
        let subscription = dispatcher.subscribe(output.address, move |_, data| {
            slot.store(HAS_VALUE | u32::from(data), Ordering::Release);
            if let Some(on_change) = &on_change {
                on_change(output.extract(data));
            }
        });

        Ok(Self {
            output,
            dispatcher: dispatcher.clone(),
            subscription,
            raw,
        })
    }

    /// Most recent raw word, `None` before the first update.
    pub fn raw(&self) -> Option<u16> {
        let stored = self.raw.load(Ordering::Acquire);
        (stored & HAS_VALUE != 0).then_some(stored as u16)
    }

    /// Most recent value with mask and shift applied.
    pub fn value(&self) -> Option<u16> {
        self.raw().map(|raw| self.output.extract(raw))
    }

    /// Check if a value has been received.
    pub fn has_value(&self) -> bool {
        self.raw.load(Ordering::Acquire) & HAS_VALUE != 0
    }

    /// Get the output this view follows.
    pub fn output(&self) -> &IntegerOutput {
        &self.output
    }
}

impl Drop for IntegerView {
    fn drop(&mut self) {
        self.dispatcher.unsubscribe(self.subscription);
    }
}

impl std::fmt::Debug for IntegerView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegerView")
            .field("output", &self.output)
            .field("value", &self.value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_no_value_before_update() {
        let dispatcher = UpdateDispatcher::new();
        let view = IntegerView::new(&dispatcher, IntegerOutput::new(0x0010)).unwrap();

        assert!(!view.has_value());
        assert_eq!(view.value(), None);
        assert_eq!(view.raw(), None);
    }

    #[test]
    fn test_whole_word() {
        let dispatcher = UpdateDispatcher::new();
        let view = IntegerView::new(&dispatcher, IntegerOutput::new(0x0010)).unwrap();

        dispatcher.dispatch_word(0x0010, 0x1234);

        assert_eq!(view.value(), Some(0x1234));
    }

    #[test]
    fn test_zero_is_a_value() {
        let dispatcher = UpdateDispatcher::new();
        let view = IntegerView::new(&dispatcher, IntegerOutput::new(0x0010)).unwrap();

        dispatcher.dispatch_word(0x0010, 0);

        assert!(view.has_value());
        assert_eq!(view.value(), Some(0));
    }

    #[test]
    fn test_mask_and_shift() {
        let dispatcher = UpdateDispatcher::new();
        let output = IntegerOutput::with_mask(0x0010, 0x0C00, 10);
        let view = IntegerView::new(&dispatcher, output).unwrap();

        dispatcher.dispatch_word(0x0010, 0b1111_1011_1111_1111);

        assert_eq!(view.raw(), Some(0xFBFF));
        assert_eq!(view.value(), Some(0b10));
        assert_eq!(output.max_value(), 3);
    }

    #[test]
    fn test_tracks_latest_word() {
        let dispatcher = UpdateDispatcher::new();
        let view = IntegerView::new(&dispatcher, IntegerOutput::new(0x0010)).unwrap();

        for data in [1, 2, 3] {
            dispatcher.dispatch_word(0x0010, data);
            assert_eq!(view.value(), Some(data));
        }
        dispatcher.dispatch_word(0x0012, 99);
        assert_eq!(view.value(), Some(3));
    }

    #[test]
    fn test_callback_publishes_immediately() {
        let dispatcher = UpdateDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let _view = IntegerView::with_callback(
            &dispatcher,
            IntegerOutput::with_mask(0x0010, 0x00F0, 4),
            move |value| s.lock().unwrap().push(value),
        )
        .unwrap();

        dispatcher.dispatch_word(0x0010, 0x0050);
        dispatcher.dispatch_word(0x0010, 0x00A0);

        assert_eq!(*seen.lock().unwrap(), vec![5, 10]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let dispatcher = UpdateDispatcher::new();
        let view = IntegerView::new(&dispatcher, IntegerOutput::new(0x0010)).unwrap();
        assert_eq!(dispatcher.subscriber_count(), 1);

        drop(view);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn test_shift_out_of_range() {
        let dispatcher = UpdateDispatcher::new();
        let result = IntegerView::new(&dispatcher, IntegerOutput::with_mask(0x0010, 0xFFFF, 16));

        assert!(matches!(result, Err(ExportError::InvalidOutput(_))));
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn test_deserialize_defaults() {
        let output: IntegerOutput = serde_json::from_str(r#"{"address": 16}"#).unwrap();
        assert_eq!(output, IntegerOutput::new(0x0010));

        let output: IntegerOutput =
            serde_json::from_str(r#"{"address": 16, "mask": 240, "shift": 4}"#).unwrap();
        assert_eq!(output, IntegerOutput::with_mask(0x0010, 0x00F0, 4));
    }
}
