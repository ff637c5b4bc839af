//! View module - composite values assembled from raw word updates.
//!
//! Provides:
//! - [`IntegerView`] - a masked, shifted sub-field of one word, updated
//!   immediately on every write
//! - [`StringView`] - a null-terminated string spread over several words,
//!   published only at frame boundaries so it is never torn
//! - [`OutputDefinition`] - the `"type"`-tagged output description found in
//!   control reference JSON, attachable to a dispatcher
//!
//! # Example
//!
//! ```
//! use export_stream::dispatch::UpdateDispatcher;
//! use export_stream::view::OutputDefinition;
//!
//! let dispatcher = UpdateDispatcher::new();
//! let outputs = OutputDefinition::parse_list(
//!     r#"[{"type": "integer", "address": 4096, "mask": 256, "shift_by": 8},
//!         {"type": "string", "address": 4098, "max_length": 6}]"#,
//! )
//! .unwrap();
//!
//! let views: Vec<_> = outputs
//!     .iter()
//!     .map(|output| output.attach(&dispatcher))
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(views.len(), 2);
//! ```

mod integer;
mod string;

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Deserialize;

pub use integer::{IntegerOutput, IntegerView, DEFAULT_MASK};
pub use string::{StringOutput, StringView};

use crate::dispatch::UpdateDispatcher;
use crate::error::Result;

/// Output description, tagged by its `"type"` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputDefinition {
    /// A sub-field of one word.
    Integer(IntegerOutput),
    /// A string spanning several words.
    String(StringOutput),
}

impl OutputDefinition {
    /// Parse a single output definition from JSON.
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a JSON array of output definitions.
    pub fn parse_list(json: &str) -> Result<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }

    /// First address covered by the output.
    pub fn address(&self) -> u16 {
        match self {
            OutputDefinition::Integer(output) => output.address,
            OutputDefinition::String(output) => output.address,
        }
    }

    /// Subscribe a view for this output on `dispatcher`.
    pub fn attach(&self, dispatcher: &UpdateDispatcher) -> Result<LiveValue> {
        match self {
            OutputDefinition::Integer(output) => {
                Ok(LiveValue::Integer(IntegerView::new(dispatcher, *output)?))
            }
            OutputDefinition::String(output) => {
                Ok(LiveValue::String(StringView::new(dispatcher, *output)?))
            }
        }
    }
}

/// A view attached from an [`OutputDefinition`].
#[derive(Debug)]
pub enum LiveValue {
    /// Attached from [`OutputDefinition::Integer`].
    Integer(IntegerView),
    /// Attached from [`OutputDefinition::String`].
    String(StringView),
}

impl LiveValue {
    /// Current value as text, `None` until the first value arrives.
    pub fn display(&self) -> Option<String> {
        match self {
            LiveValue::Integer(view) => view.value().map(|v| v.to_string()),
            LiveValue::String(view) => view.value_lossy(),
        }
    }

    /// Check if a value has been received.
    pub fn has_value(&self) -> bool {
        match self {
            LiveValue::Integer(view) => view.has_value(),
            LiveValue::String(view) => view.has_value(),
        }
    }
}

/// Lock view state, ignoring poisoning from a panicked publisher.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integer_definition() {
        let output = OutputDefinition::parse(
            r#"{"type": "integer", "address": 4616, "mask": 3072, "shift_by": 10,
                "max_value": 3, "description": "selector position", "suffix": ""}"#,
        )
        .unwrap();

        assert_eq!(
            output,
            OutputDefinition::Integer(IntegerOutput {
                address: 0x1208,
                mask: 0x0C00,
                shift: 10,
            })
        );
        assert_eq!(output.address(), 0x1208);
    }

    #[test]
    fn test_parse_string_definition() {
        let output = OutputDefinition::parse(
            r#"{"type": "string", "address": 4352, "max_length": 16, "description": "UFC"}"#,
        )
        .unwrap();

        assert_eq!(
            output,
            OutputDefinition::String(StringOutput {
                address: 0x1100,
                max_length: 16,
            })
        );
    }

    #[test]
    fn test_parse_unknown_type_fails() {
        let result = OutputDefinition::parse(r#"{"type": "float", "address": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_attach_and_display() {
        let dispatcher = UpdateDispatcher::new();
        let outputs = OutputDefinition::parse_list(
            r#"[{"type": "integer", "address": 16, "mask": 65280, "shift_by": 8},
                {"type": "string", "address": 32, "max_length": 2}]"#,
        )
        .unwrap();

        let values: Vec<LiveValue> = outputs
            .iter()
            .map(|o| o.attach(&dispatcher))
            .collect::<Result<_>>()
            .unwrap();

        assert!(values.iter().all(|v| v.display().is_none()));

        dispatcher.dispatch_word(0x0010, 0x2A00);
        dispatcher.dispatch_word(0x0020, u16::from_le_bytes(*b"OK"));
        dispatcher.dispatch_boundary();

        assert_eq!(values[0].display().as_deref(), Some("42"));
        assert_eq!(values[1].display().as_deref(), Some("OK"));
        assert!(values.iter().all(LiveValue::has_value));
    }

    #[test]
    fn test_attach_rejects_invalid_output() {
        let dispatcher = UpdateDispatcher::new();
        let output = OutputDefinition::String(StringOutput {
            address: 0x0010,
            max_length: 0,
        });

        assert!(output.attach(&dispatcher).is_err());
        assert_eq!(dispatcher.subscriber_count(), 0);
    }
}
