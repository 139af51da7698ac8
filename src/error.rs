use serde_json::{Map, Value};
use thiserror::Error;

/// Boxed cause attached to transport and streaming failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Aggregates every failure mode exposed by the client.
///
/// Retryable causes (network failures, 429 and 5xx responses) only reach the caller once
/// the retry budget is exhausted; everything else surfaces on the first attempt. Use
/// [`ApiError::status`] and [`ApiError::body`] to branch on the remote response without
/// matching on individual variants.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: &'static str,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// Connection, timeout or other networking failure with no usable response.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// The server answered with a status outside `200..300`.
    #[error("HTTP status {status}: {message}")]
    Status {
        status: u16,
        /// Message extracted from the error body, or a generic description.
        message: String,
        /// Response body decoded as a JSON object, when it was one.
        body: Option<Map<String, Value>>,
    },
    /// A response body or streamed payload was not the expected JSON.
    #[error("failed to decode JSON: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
    /// The connection failed after streaming had started.
    #[error("streaming request failed: {message}")]
    Stream {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// The request could not be serialized or assembled.
    #[error("invalid request: {message}")]
    Validation { message: String },
}

impl ApiError {
    /// Creates an [`ApiError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use cerebras_client::error::ApiError;
    ///
    /// let err = ApiError::transport("dns lookup failed");
    /// assert!(err.is_transport());
    /// assert_eq!(err.status(), None);
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an [`ApiError::Transport`] that keeps the underlying error as its source.
    pub fn transport_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wraps a `serde_json` failure into an [`ApiError::Decode`].
    pub fn decode(source: serde_json::Error) -> Self {
        Self::Decode {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Marks an error raised by the body stream as a mid-stream failure.
    ///
    /// Errors that already describe a stream or decode problem are returned unchanged.
    pub(crate) fn into_stream_failure(self) -> Self {
        match self {
            Self::Stream { .. } | Self::Decode { .. } => self,
            other => Self::Stream {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// HTTP status of the failed response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Decoded error body of the failed response, if it was valid JSON.
    pub fn body(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Status { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` for network-level failures that never produced a response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Picks a human-readable message out of an error body.
///
/// Handles both `{"message": ..}` and the nested `{"error": {"message": ..}}` shape.
pub(crate) fn extract_error_message(body: &Map<String, Value>) -> Option<String> {
    let direct = body.get("message").and_then(Value::as_str);
    let nested = body
        .get("error")
        .and_then(|error| match error {
            Value::String(text) => Some(text.as_str()),
            Value::Object(inner) => inner.get("message").and_then(Value::as_str),
            _ => None,
        });
    direct
        .or(nested)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}
