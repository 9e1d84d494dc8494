//! Data-channel event handling and UI dispatch.
//!
//! Every inbound text message is recorded in the session's message log —
//! parsed JSON when it parses, the raw string otherwise. Completed
//! function-call events carrying the local UI-mutation call are decoded
//! into [`UiEvent`]s and applied to the widget store.

use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use voxdeck_core::{UiEvent, UiStore};

/// Event types that mark a completed function call. The first is the
/// legacy literal, the second the current one.
const FUNCTION_CALL_TYPES: [&str; 2] = ["function_call", "response.function_call_arguments.done"];

/// The only function call handled locally; everything else stays
/// unforwarded (a backend executor path is deferred).
const UI_FUNCTION_NAME: &str = "add_to_ui";

/// Widget kind eligible for spoken confirmations.
const CARD_KIND: &str = "card.basic";

/// A message received on the data channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Parsed(Value),
    Raw(String),
}

/// A completed function call extracted from an inbound event.
#[derive(Debug, Clone)]
pub(crate) struct FunctionCall {
    pub name: String,
    pub arguments: Value,
}

/// Extract a completed function call, if the event is one.
///
/// Both `name` and `arguments` must be present. String-encoded arguments
/// are parsed here; invalid argument JSON drops the call.
pub(crate) fn extract_function_call(event: &Value) -> Option<FunctionCall> {
    let event_type = event.get("type")?.as_str()?;
    if !FUNCTION_CALL_TYPES.contains(&event_type) {
        return None;
    }
    let name = event.get("name")?.as_str()?.to_string();
    let raw_arguments = event.get("arguments")?;

    let arguments = if let Some(encoded) = raw_arguments.as_str() {
        match serde_json::from_str(encoded) {
            Ok(value) => value,
            Err(e) => {
                warn!(name, error = %e, "Invalid function arguments JSON, dropping call");
                return None;
            }
        }
    } else {
        raw_arguments.clone()
    };

    Some(FunctionCall { name, arguments })
}

/// Spoken confirmation for a card mutation, when it carries a title.
pub(crate) fn confirmation_text(event: &UiEvent) -> Option<String> {
    let (created, kind, payload) = match event {
        UiEvent::Create { kind, payload } => (true, kind, payload),
        UiEvent::Update { kind, payload } => (false, kind, payload),
        UiEvent::Unknown { .. } => return None,
    };
    if kind.as_str() != CARD_KIND {
        return None;
    }
    let title = payload
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())?;

    Some(if created {
        format!("Added card “{title}.”")
    } else {
        format!("Updated card “{title}.”")
    })
}

/// Outbound `conversation.item.create` wrapping an assistant text message.
pub(crate) fn assistant_text_item(text: &str) -> Value {
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "text", "text": text }],
        },
    })
}

/// Process one inbound data-channel text message.
///
/// Records the message, dispatches a recognized UI mutation into the
/// store, and returns the confirmation text to send back, if any.
/// Malformed messages are recorded raw and never fail the session.
pub(crate) async fn apply_channel_text(
    text: &str,
    messages: &RwLock<Vec<ChannelMessage>>,
    store: &RwLock<UiStore>,
) -> Option<String> {
    let parsed: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            messages.write().await.push(ChannelMessage::Raw(text.to_string()));
            return None;
        }
    };
    messages.write().await.push(ChannelMessage::Parsed(parsed.clone()));

    let call = extract_function_call(&parsed)?;
    if call.name != UI_FUNCTION_NAME {
        debug!(name = %call.name, "Unhandled function call");
        return None;
    }

    let event_type = call
        .arguments
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let event = UiEvent::decode(event_type, call.arguments.get("custom_data"));
    debug!(event_type, "Dispatching UI event");

    store.write().await.apply(event.clone());
    confirmation_text(&event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixtures() -> (RwLock<Vec<ChannelMessage>>, RwLock<UiStore>) {
        (RwLock::new(Vec::new()), RwLock::new(UiStore::new()))
    }

    fn ui_call(event_type: &str, custom_data: Value) -> String {
        json!({
            "type": "response.function_call_arguments.done",
            "name": "add_to_ui",
            "arguments": json!({"type": event_type, "custom_data": custom_data}).to_string(),
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_malformed_json_recorded_raw() {
        let (messages, store) = fixtures();
        let confirmation = apply_channel_text("not json {", &messages, &store).await;

        assert!(confirmation.is_none());
        assert_eq!(
            *messages.read().await,
            vec![ChannelMessage::Raw("not json {".into())]
        );
        assert!(store.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_ordinary_event_recorded_parsed() {
        let (messages, store) = fixtures();
        apply_channel_text(r#"{"type":"session.created"}"#, &messages, &store).await;

        assert_eq!(messages.read().await.len(), 1);
        assert!(matches!(
            messages.read().await[0],
            ChannelMessage::Parsed(_)
        ));
        assert!(store.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_ui_create_dispatches_and_confirms() {
        let (messages, store) = fixtures();
        let text = ui_call("card.create", json!({"title": "Groceries"}));
        let confirmation = apply_channel_text(&text, &messages, &store).await;

        assert_eq!(confirmation.as_deref(), Some("Added card “Groceries.”"));
        let store = store.read().await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.items()[0].kind.as_str(), "card.basic");
    }

    #[tokio::test]
    async fn test_ui_update_confirms() {
        let (messages, store) = fixtures();
        let create = ui_call("card.basic.create", json!({"id": "c1", "title": "A"}));
        apply_channel_text(&create, &messages, &store).await;

        let update = ui_call("card.basic.update", json!({"id": "c1", "title": "B"}));
        let confirmation = apply_channel_text(&update, &messages, &store).await;

        assert_eq!(confirmation.as_deref(), Some("Updated card “B.”"));
        assert_eq!(store.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_title_skips_confirmation() {
        let (messages, store) = fixtures();
        let text = ui_call("card.create", json!({"description": "untitled"}));
        let confirmation = apply_channel_text(&text, &messages, &store).await;

        assert!(confirmation.is_none());
        assert_eq!(store.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_non_card_kind_skips_confirmation() {
        let (messages, store) = fixtures();
        let text = ui_call("chart.line.create", json!({"title": "Revenue"}));
        let confirmation = apply_channel_text(&text, &messages, &store).await;

        assert!(confirmation.is_none());
        assert_eq!(store.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_function_call_type_recognized() {
        let (messages, store) = fixtures();
        let text = json!({
            "type": "function_call",
            "name": "add_to_ui",
            "arguments": {"type": "card.create", "custom_data": {"title": "Legacy"}},
        })
        .to_string();
        let confirmation = apply_channel_text(&text, &messages, &store).await;

        assert_eq!(confirmation.as_deref(), Some("Added card “Legacy.”"));
    }

    #[tokio::test]
    async fn test_invalid_argument_json_dropped() {
        let (messages, store) = fixtures();
        let text = json!({
            "type": "function_call",
            "name": "add_to_ui",
            "arguments": "{broken",
        })
        .to_string();
        let confirmation = apply_channel_text(&text, &messages, &store).await;

        assert!(confirmation.is_none());
        // The event itself parsed fine, so it is still recorded.
        assert_eq!(messages.read().await.len(), 1);
        assert!(store.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_name_or_arguments_ignored() {
        let (messages, store) = fixtures();
        let no_name = json!({"type": "function_call", "arguments": "{}"}).to_string();
        let no_args = json!({"type": "function_call", "name": "add_to_ui"}).to_string();

        assert!(apply_channel_text(&no_name, &messages, &store).await.is_none());
        assert!(apply_channel_text(&no_args, &messages, &store).await.is_none());
        assert!(store.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_other_function_names_not_dispatched() {
        let (messages, store) = fixtures();
        let text = json!({
            "type": "function_call",
            "name": "search_web",
            "arguments": {"query": "weather"},
        })
        .to_string();
        let confirmation = apply_channel_text(&text, &messages, &store).await;

        assert!(confirmation.is_none());
        assert!(store.read().await.is_empty());
    }

    #[test]
    fn test_assistant_item_shape() {
        let item = assistant_text_item("Added card “A.”");
        assert_eq!(item["type"], "conversation.item.create");
        assert_eq!(item["item"]["type"], "message");
        assert_eq!(item["item"]["role"], "assistant");
        assert_eq!(item["item"]["content"][0]["type"], "text");
        assert_eq!(item["item"]["content"][0]["text"], "Added card “A.”");
    }

    #[test]
    fn test_extract_unstringified_arguments() {
        let event = json!({
            "type": "response.function_call_arguments.done",
            "name": "add_to_ui",
            "arguments": {"type": "card.create"},
        });
        let call = extract_function_call(&event).unwrap();
        assert_eq!(call.arguments["type"], "card.create");
    }
}
