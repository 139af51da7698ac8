//! Request and response types.
//!
//! Requests are strongly typed. Responses stay semi-structured: each wraps the decoded
//! JSON object unchanged and offers a few accessors for the commonly used paths, since
//! the remote schema grows new fields over time.

use std::ops::Deref;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decode::JsonMap;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Body of a chat completion call.
///
/// The `stream` flag is not settable: the client fixes it according to the method
/// used. Extra top-level fields (`top_p`, `stop`, `seed`, ...) go into [`extra`] and are
/// sent as-is, except for keys that collide with the typed fields.
///
/// [`extra`]: CompletionRequest::extra
///
/// # Examples
///
/// ```
/// use cerebras_client::types::{ChatMessage, CompletionRequest};
///
/// let request = CompletionRequest::new(
///     "llama3.1-8b",
///     vec![ChatMessage::user("Write a haiku about the ocean.")],
/// )
/// .with_temperature(0.7)
/// .with_max_tokens(200);
///
/// let body = serde_json::to_value(&request).unwrap();
/// assert_eq!(body["model"], "llama3.1-8b");
/// assert_eq!(body["max_tokens"], 200);
/// assert!(body.get("stream").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

const TYPED_FIELDS: [&str; 5] = ["model", "messages", "temperature", "max_tokens", "stream"];

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            stream: None,
            extra: JsonMap::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Adds an untyped top-level field to the request body.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn stream(&self) -> Option<bool> {
        self.stream
    }

    /// Fixes the stream flag and drops extra keys that would shadow typed fields.
    pub(crate) fn into_wire(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        for key in TYPED_FIELDS {
            self.extra.remove(key);
        }
        self
    }
}

/// Decoded body of a non-streaming completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionResult(JsonMap);

impl CompletionResult {
    pub fn into_inner(self) -> JsonMap {
        self.0
    }

    pub fn as_map(&self) -> &JsonMap {
        &self.0
    }

    /// The `choices` array, or an empty slice when absent.
    pub fn choices(&self) -> &[Value] {
        array_field(&self.0, "choices")
    }

    /// Text of `choices[0].message.content`.
    pub fn content(&self) -> Option<&str> {
        self.choices()
            .first()?
            .get("message")?
            .get("content")?
            .as_str()
    }

    /// `choices[0].message` as a typed message, if it has a known role and text.
    pub fn first_message(&self) -> Option<ChatMessage> {
        let message = self.choices().first()?.get("message")?;
        serde_json::from_value(message.clone()).ok()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices().first()?.get("finish_reason")?.as_str()
    }
}

impl From<JsonMap> for CompletionResult {
    fn from(map: JsonMap) -> Self {
        Self(map)
    }
}

impl Deref for CompletionResult {
    type Target = JsonMap;

    fn deref(&self) -> &JsonMap {
        &self.0
    }
}

/// One decoded `data:` payload of a streamed completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamEvent(JsonMap);

impl StreamEvent {
    pub fn into_inner(self) -> JsonMap {
        self.0
    }

    pub fn as_map(&self) -> &JsonMap {
        &self.0
    }

    pub fn choices(&self) -> &[Value] {
        array_field(&self.0, "choices")
    }

    /// Text fragment at `choices[0].delta.content`.
    pub fn delta_content(&self) -> Option<&str> {
        self.choices().first()?.get("delta")?.get("content")?.as_str()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices().first()?.get("finish_reason")?.as_str()
    }
}

impl From<JsonMap> for StreamEvent {
    fn from(map: JsonMap) -> Self {
        Self(map)
    }
}

impl Deref for StreamEvent {
    type Target = JsonMap;

    fn deref(&self) -> &JsonMap {
        &self.0
    }
}

/// Decoded body of the model listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelList(JsonMap);

impl ModelList {
    pub fn into_inner(self) -> JsonMap {
        self.0
    }

    pub fn as_map(&self) -> &JsonMap {
        &self.0
    }

    /// The `data` array.
    pub fn data(&self) -> &[Value] {
        array_field(&self.0, "data")
    }

    /// `id` of every entry in `data` that has one.
    pub fn ids(&self) -> Vec<&str> {
        self.data()
            .iter()
            .filter_map(|model| model.get("id").and_then(Value::as_str))
            .collect()
    }
}

impl From<JsonMap> for ModelList {
    fn from(map: JsonMap) -> Self {
        Self(map)
    }
}

impl Deref for ModelList {
    type Target = JsonMap;

    fn deref(&self) -> &JsonMap {
        &self.0
    }
}

fn array_field<'a>(map: &'a JsonMap, key: &str) -> &'a [Value] {
    map.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn request_serializes_wire_shape() {
        let request = CompletionRequest::new(
            "llama3.1-8b",
            vec![
                ChatMessage::system("You are a helpful assistant."),
                ChatMessage::user("Hi"),
            ],
        )
        .with_temperature(0.5)
        .into_wire(true);

        let body = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            body,
            json!({
                "model": "llama3.1-8b",
                "messages": [
                    { "role": "system", "content": "You are a helpful assistant." },
                    { "role": "user", "content": "Hi" }
                ],
                "temperature": 0.5,
                "stream": true
            })
        );
    }

    #[test]
    fn into_wire_strips_shadowing_extra_keys() {
        let request = CompletionRequest::new("m", vec![ChatMessage::user("x")])
            .with_extra("stream", json!(true))
            .with_extra("model", json!("other"))
            .with_extra("top_p", json!(0.9))
            .into_wire(false);

        let body = serde_json::to_value(&request).expect("serialize");
        assert_eq!(body["stream"], json!(false));
        assert_eq!(body["model"], json!("m"));
        assert_eq!(body["top_p"], json!(0.9));
        assert_eq!(request.stream(), Some(false));
    }

    #[test]
    fn request_round_trips_through_json() {
        let request = CompletionRequest::new("m", vec![ChatMessage::assistant("ok")])
            .with_max_tokens(10)
            .with_extra("seed", json!(7));
        let text = serde_json::to_string(&request).expect("serialize");
        let parsed: CompletionRequest = serde_json::from_str(&text).expect("parse");
        assert_eq!(parsed, request);
    }

    #[test]
    fn completion_result_accessors() {
        let result = CompletionResult::from(map(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Waves fold on sand" },
                "finish_reason": "stop"
            }],
            "usage": { "total_tokens": 12 }
        })));

        assert_eq!(result.content(), Some("Waves fold on sand"));
        assert_eq!(result.finish_reason(), Some("stop"));
        assert_eq!(
            result.first_message(),
            Some(ChatMessage::assistant("Waves fold on sand"))
        );
        assert_eq!(result["id"], json!("chatcmpl-1"));
    }

    #[test]
    fn accessors_tolerate_missing_fields() {
        let result = CompletionResult::from(map(json!({ "choices": "not-an-array" })));
        assert!(result.choices().is_empty());
        assert_eq!(result.content(), None);
        assert_eq!(result.first_message(), None);

        let event = StreamEvent::from(map(json!({ "choices": [{ "delta": {} }] })));
        assert_eq!(event.delta_content(), None);
    }

    #[test]
    fn stream_event_reads_delta() {
        let event = StreamEvent::from(map(json!({
            "choices": [{ "index": 0, "delta": { "content": "Hel" }, "finish_reason": null }]
        })));
        assert_eq!(event.delta_content(), Some("Hel"));
        assert_eq!(event.finish_reason(), None);
    }

    #[test]
    fn model_list_ids() {
        let models = ModelList::from(map(json!({
            "object": "list",
            "data": [{ "id": "llama3.1-8b" }, { "object": "model" }, { "id": "qwen-3-32b" }]
        })));
        assert_eq!(models.ids(), vec!["llama3.1-8b", "qwen-3-32b"]);
        assert_eq!(models.data().len(), 3);
    }
}
