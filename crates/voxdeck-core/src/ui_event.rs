//! UI event decoding — dotted event paths into tagged variants.
//!
//! Inbound UI events carry a dotted type path: `<kind>.<subkind>.<action>`,
//! or the legacy two-segment `<kind>.<action>` which aliases to
//! `<kind>.basic`. Decoding happens once at the boundary; everything past
//! this point works with [`UiEvent`] variants.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Subkind substituted for legacy two-segment event types.
pub const LEGACY_SUBKIND: &str = "basic";

/// A two-level widget kind path, e.g. `card.basic`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetKind(String);

impl WidgetKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded UI event.
///
/// Actions other than `create`/`update` — and type paths that don't parse —
/// fall through to [`UiEvent::Unknown`], which the store ignores.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Create {
        kind: WidgetKind,
        payload: Map<String, Value>,
    },
    Update {
        kind: WidgetKind,
        payload: Map<String, Value>,
    },
    Unknown {
        event_type: String,
    },
}

impl UiEvent {
    /// Decode an event type path and payload into a tagged variant.
    ///
    /// A missing or non-object payload is treated as an empty object.
    pub fn decode(event_type: &str, payload: Option<&Value>) -> Self {
        let payload = payload
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let segments: Vec<&str> = event_type.split('.').collect();
        let (kind, action) = match segments.as_slice() {
            [kind, action] => (format!("{kind}.{LEGACY_SUBKIND}"), *action),
            [kind, subkind, action, ..] => (format!("{kind}.{subkind}"), *action),
            _ => {
                return Self::Unknown {
                    event_type: event_type.to_string(),
                };
            }
        };

        match action {
            "create" => Self::Create {
                kind: WidgetKind(kind),
                payload,
            },
            "update" => Self::Update {
                kind: WidgetKind(kind),
                payload,
            },
            _ => Self::Unknown {
                event_type: event_type.to_string(),
            },
        }
    }

    /// The widget kind, when the event targets one.
    pub fn kind(&self) -> Option<&WidgetKind> {
        match self {
            Self::Create { kind, .. } | Self::Update { kind, .. } => Some(kind),
            Self::Unknown { .. } => None,
        }
    }
}
