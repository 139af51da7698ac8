use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;

use crate::config::ClientConfig;
use crate::decode::decode_json_bytes;
use crate::error::ApiError;
use crate::http::reqwest::dyn_transport_for;
use crate::http::retrying::RetryingTransport;
use crate::http::{DynHttpTransport, HttpRequest};
use crate::retry::RetryPolicy;
use crate::sse::EventStream;
use crate::types::{CompletionRequest, CompletionResult, ModelList, StreamEvent};

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";
const MODELS_PATH: &str = "models";

const JSON_MIME: &str = "application/json";
const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Streamed completion: one item per decoded `data:` payload.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ApiError>> + Send>>;

/// Entry point for the chat-completion API.
///
/// Cloning is cheap and clones share the underlying connection pool. The client holds
/// no per-call state, so one instance can serve concurrent calls.
///
/// # Examples
///
/// ```no_run
/// use cerebras_client::{CerebrasClient, ClientConfig};
/// use cerebras_client::types::{ChatMessage, CompletionRequest};
///
/// # async fn run() -> Result<(), cerebras_client::ApiError> {
/// let client = CerebrasClient::new(ClientConfig::new("sk-...")?)?;
/// let result = client
///     .create_completion(CompletionRequest::new(
///         "llama3.1-8b",
///         vec![ChatMessage::user("Write a haiku about the ocean.")],
///     ))
///     .await?;
/// println!("{}", result.content().unwrap_or_default());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CerebrasClient {
    config: Arc<ClientConfig>,
    transport: RetryingTransport,
}

impl CerebrasClient {
    /// Creates a client on top of the default `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be initialised.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let transport = dyn_transport_for(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Builds the configuration from `CEREBRAS_*` environment variables.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Creates a client that sends every request through `transport`.
    pub fn with_transport(config: ClientConfig, transport: DynHttpTransport) -> Self {
        let policy = RetryPolicy::new(*config.retry());
        Self {
            config: Arc::new(config),
            transport: RetryingTransport::new(transport, policy),
        }
    }

    /// Replaces the retry policy derived from the configuration.
    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        let Self { config, transport } = self;
        let transport = transport.with_policy(policy);
        Self { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs a non-streaming completion and returns the decoded body unchanged.
    ///
    /// # Errors
    ///
    /// [`ApiError::Status`] for a non-2xx answer, [`ApiError::Transport`] once retries
    /// are exhausted, [`ApiError::Decode`] if the body is not a JSON object.
    pub async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResult, ApiError> {
        let body = encode(&request.into_wire(false))?;
        let request = HttpRequest::post_json(self.config.endpoint(CHAT_COMPLETIONS_PATH), body)
            .with_headers(self.build_headers(JSON_MIME))
            .with_timeout(self.config.request_timeout());
        let response = self.transport.execute(request).await?;
        decode_json_bytes(&response.body).map(CompletionResult::from)
    }

    /// Starts a streamed completion.
    ///
    /// Resolves once the server has accepted the request; events are then read and
    /// decoded only as the returned stream is polled. Dropping the stream closes the
    /// connection. The request timeout bounds the wait for response headers and the
    /// gap between two body reads, not the length of the whole stream.
    ///
    /// # Errors
    ///
    /// The call itself fails like [`CerebrasClient::create_completion`]. Items of the
    /// stream can be [`ApiError::Decode`] for a malformed payload or
    /// [`ApiError::Stream`] when the connection breaks; either ends the stream.
    pub async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ApiError> {
        let body = encode(&request.into_wire(true))?;
        let request = HttpRequest::post_json(self.config.endpoint(CHAT_COMPLETIONS_PATH), body)
            .with_headers(self.build_headers(EVENT_STREAM_MIME))
            .with_timeout(self.config.request_timeout());
        let body = self.transport.execute_stream(request).await?;
        Ok(Box::pin(EventStream::new(body)))
    }

    /// Lists the models available to the API key.
    pub async fn list_models(&self) -> Result<ModelList, ApiError> {
        let request = HttpRequest::get(self.config.endpoint(MODELS_PATH))
            .with_headers(self.build_headers(JSON_MIME))
            .with_timeout(self.config.request_timeout());
        let response = self.transport.execute(request).await?;
        decode_json_bytes(&response.body).map(ModelList::from)
    }

    fn build_headers(&self, accept: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.config.api_key()),
        );
        headers.insert("Content-Type".to_string(), JSON_MIME.to_string());
        headers.insert("Accept".to_string(), accept.to_string());
        if let Some(org) = self.config.organization() {
            headers.insert("X-Organization".to_string(), org.to_string());
        }
        headers
    }
}

impl std::fmt::Debug for CerebrasClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CerebrasClient")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .finish()
    }
}

fn encode(request: &CompletionRequest) -> Result<Vec<u8>, ApiError> {
    serde_json::to_vec(request).map_err(|err| ApiError::Validation {
        message: format!("failed to serialize request: {err}"),
    })
}

/// Drains a completion stream and concatenates every `delta.content` fragment.
///
/// # Errors
///
/// Returns the first error yielded by the stream.
pub async fn collect_content<S>(mut stream: S) -> Result<String, ApiError>
where
    S: Stream<Item = Result<StreamEvent, ApiError>> + Unpin,
{
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        if let Some(fragment) = event?.delta_content() {
            text.push_str(fragment);
        }
    }
    Ok(text)
}
