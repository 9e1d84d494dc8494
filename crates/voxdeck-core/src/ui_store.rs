//! Widget store — insertion-ordered upsert map driven by UI events.
//!
//! One store per application instance; share it as [`SharedUiStore`]. There
//! is no history and no eviction — items live for the lifetime of the
//! store.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::ui_event::{UiEvent, WidgetKind};

/// A single widget record.
///
/// `props` is a free-form field map merged shallowly on update.
#[derive(Debug, Clone, Serialize)]
pub struct WidgetItem {
    pub id: String,
    pub kind: WidgetKind,
    pub props: Map<String, Value>,
}

/// Store handle shared between the session connector and the rendering layer.
pub type SharedUiStore = Arc<RwLock<UiStore>>;

/// Insertion-ordered widget store keyed by `(id, kind)`.
#[derive(Debug, Default)]
pub struct UiStore {
    items: Vec<WidgetItem>,
    index: HashMap<(String, WidgetKind), usize>,
}

impl UiStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedUiStore {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Apply a decoded UI event.
    ///
    /// `Create` upserts by `(id, kind)`, synthesizing an id when the payload
    /// carries none. `Update` shallow-merges into an existing item and is a
    /// silent no-op for unknown pairs. `Unknown` events are ignored.
    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Create { kind, payload } => {
                let id = payload
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| synthesize_id(&kind));
                self.upsert(id, kind, payload);
            }
            UiEvent::Update { kind, payload } => {
                let Some(id) = payload.get("id").and_then(Value::as_str) else {
                    return;
                };
                let key = (id.to_string(), kind);
                let Some(&slot) = self.index.get(&key) else {
                    debug!(id, kind = %key.1, "update for unknown widget ignored");
                    return;
                };
                merge_props(&mut self.items[slot].props, &payload);
            }
            UiEvent::Unknown { event_type } => {
                debug!(event_type, "unrecognized UI event ignored");
            }
        }
    }

    fn upsert(&mut self, id: String, kind: WidgetKind, payload: Map<String, Value>) {
        let key = (id.clone(), kind.clone());
        match self.index.get(&key) {
            Some(&slot) => merge_props(&mut self.items[slot].props, &payload),
            None => {
                let mut props = payload;
                props.remove("id");
                self.items.push(WidgetItem { id, kind, props });
                self.index.insert(key, self.items.len() - 1);
            }
        }
    }

    /// Current widget items in insertion order.
    pub fn items(&self) -> &[WidgetItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str, kind: &WidgetKind) -> Option<&WidgetItem> {
        self.index
            .get(&(id.to_string(), kind.clone()))
            .map(|&slot| &self.items[slot])
    }
}

fn synthesize_id(kind: &WidgetKind) -> String {
    format!("{}_{}", kind, chrono::Utc::now().timestamp_millis())
}

/// Shallow merge: every payload field except `id` overwrites the prop.
fn merge_props(props: &mut Map<String, Value>, payload: &Map<String, Value>) {
    for (key, value) in payload {
        if key == "id" {
            continue;
        }
        props.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(event_type: &str, payload: Value) -> UiEvent {
        UiEvent::decode(event_type, Some(&payload))
    }

    #[test]
    fn test_legacy_create_aliases_basic_kind() {
        let mut store = UiStore::new();
        store.apply(decode("card.create", json!({"title": "A"})));

        assert_eq!(store.len(), 1);
        assert_eq!(store.items()[0].kind.as_str(), "card.basic");
    }

    #[test]
    fn test_three_segment_create_keeps_kind() {
        let mut store = UiStore::new();
        store.apply(decode("chart.line.create", json!({"id": "ch1"})));

        assert_eq!(store.items()[0].kind.as_str(), "chart.line");
        assert_eq!(store.items()[0].id, "ch1");
    }

    #[test]
    fn test_create_synthesizes_id() {
        let mut store = UiStore::new();
        store.apply(decode("card.basic.create", json!({"title": "A"})));

        let item = &store.items()[0];
        assert!(item.id.starts_with("card.basic_"), "id was {}", item.id);
        assert!(!item.props.contains_key("id"));
    }

    #[test]
    fn test_create_then_update_merges() {
        let mut store = UiStore::new();
        store.apply(decode("card.basic.create", json!({"id": "c1", "title": "A"})));
        store.apply(decode(
            "card.basic.update",
            json!({"id": "c1", "title": "B"}),
        ));

        assert_eq!(store.len(), 1);
        assert_eq!(store.items()[0].props["title"], "B");
    }

    #[test]
    fn test_update_keeps_unmentioned_props() {
        let mut store = UiStore::new();
        store.apply(decode(
            "card.basic.create",
            json!({"id": "c1", "title": "A", "status": "open"}),
        ));
        store.apply(decode(
            "card.basic.update",
            json!({"id": "c1", "title": "B"}),
        ));

        let item = store.get("c1", &WidgetKind::new("card.basic")).unwrap();
        assert_eq!(item.props["title"], "B");
        assert_eq!(item.props["status"], "open");
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let mut store = UiStore::new();
        store.apply(decode(
            "card.basic.update",
            json!({"id": "nonexistent", "title": "B"}),
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_without_id_is_noop() {
        let mut store = UiStore::new();
        store.apply(decode("card.basic.update", json!({"title": "B"})));
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_create_upserts() {
        let mut store = UiStore::new();
        store.apply(decode("card.basic.create", json!({"id": "c1", "title": "A"})));
        store.apply(decode("card.basic.create", json!({"id": "c1", "title": "B"})));

        assert_eq!(store.len(), 1);
        assert_eq!(store.items()[0].props["title"], "B");
    }

    #[test]
    fn test_same_id_different_kind_coexist() {
        let mut store = UiStore::new();
        store.apply(decode("card.basic.create", json!({"id": "x"})));
        store.apply(decode("chart.line.create", json!({"id": "x"})));

        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_unknown_event_ignored() {
        let mut store = UiStore::new();
        store.apply(decode("card.basic.delete", json!({"id": "c1"})));
        assert!(store.is_empty());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut store = UiStore::new();
        store.apply(decode("card.basic.create", json!({"id": "first"})));
        store.apply(decode("card.basic.create", json!({"id": "second"})));
        store.apply(decode(
            "card.basic.update",
            json!({"id": "first", "title": "T"}),
        ));

        let ids: Vec<&str> = store.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
