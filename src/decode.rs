//! Decoding of JSON response bodies into semi-structured maps.

use serde_json::{Map, Value};

use crate::error::ApiError;

/// Loosely typed JSON object returned by the API.
pub type JsonMap = Map<String, Value>;

/// Decodes a response body into a JSON object.
///
/// # Examples
///
/// ```
/// use cerebras_client::decode::decode_json;
///
/// let map = decode_json(r#"{"a":1,"b":"x"}"#).unwrap();
/// assert_eq!(map["a"], 1);
/// assert_eq!(map["b"], "x");
/// assert!(decode_json("{invalid}").is_err());
/// ```
///
/// # Errors
///
/// Returns [`ApiError::Decode`] when the body is not valid JSON or is valid JSON but not
/// an object.
pub fn decode_json(body: &str) -> Result<JsonMap, ApiError> {
    match serde_json::from_str::<Value>(body).map_err(ApiError::decode)? {
        Value::Object(map) => Ok(map),
        other => Err(ApiError::Decode {
            message: format!("expected a JSON object, found {}", kind_of(&other)),
            source: None,
        }),
    }
}

/// Same as [`decode_json`] over raw bytes; invalid UTF-8 is a decode failure.
pub fn decode_json_bytes(body: &[u8]) -> Result<JsonMap, ApiError> {
    let text = std::str::from_utf8(body).map_err(|err| ApiError::Decode {
        message: format!("response body is not valid UTF-8: {err}"),
        source: None,
    })?;
    decode_json(text)
}

/// Best-effort decode used for error bodies, where a failure must not hide the status.
pub(crate) fn try_decode_json(body: &[u8]) -> Option<JsonMap> {
    decode_json_bytes(body).ok()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
