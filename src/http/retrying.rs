//! Retry loop around an [`HttpTransport`].

use std::time::Duration;

use crate::decode::{JsonMap, try_decode_json};
use crate::error::{ApiError, extract_error_message};
use crate::retry::{AttemptOutcome, RetryPolicy};

use super::{
    DynHttpTransport, HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse,
    collect_body,
};

/// Issues requests through an inner transport and retries transient failures.
///
/// Successful calls always come back with a status in `200..300`. Everything else is
/// turned into an [`ApiError`] once [`RetryPolicy`] gives up.
#[derive(Clone)]
pub struct RetryingTransport {
    inner: DynHttpTransport,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(inner: DynHttpTransport, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sends a buffered request, retrying network failures, `429` and `5xx`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Status`] with the decoded error body for a final non-2xx
    /// response, or the last [`ApiError::Transport`] once retries are exhausted.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut attempt = 0;
        loop {
            log_attempt(&request, attempt, self.policy.max_retries());
            let outcome = self.inner.send(request.clone()).await;
            let delay = match outcome {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    let decision = self
                        .policy
                        .decide(attempt, AttemptOutcome::Status(response.status));
                    if !decision.should_retry {
                        return Err(status_error(response.status, &response.body));
                    }
                    decision.delay
                }
                Err(err) => self.retry_delay(attempt, err)?,
            };
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Opens a streaming request.
    ///
    /// Only connection setup and the response status are retried. The request timeout,
    /// if any, bounds the wait for response headers and is retried like a network
    /// failure. The returned body is handed over untouched; failures while reading it
    /// are the caller's to report.
    ///
    /// # Errors
    ///
    /// Same as [`RetryingTransport::execute`]. The body of a failed response is read
    /// within the same timeout to build the error.
    pub async fn execute_stream(&self, request: HttpRequest) -> Result<HttpBodyStream, ApiError> {
        let mut attempt = 0;
        loop {
            log_attempt(&request, attempt, self.policy.max_retries());
            let outcome = open_stream(&self.inner, request.clone()).await;
            let delay = match outcome {
                Ok(response) if response.is_success() => return Ok(response.body),
                Ok(HttpStreamResponse { status, body, .. }) => {
                    let decision = self.policy.decide(attempt, AttemptOutcome::Status(status));
                    if !decision.should_retry {
                        let bytes = read_error_body(body, request.timeout).await;
                        return Err(status_error(status, &bytes));
                    }
                    decision.delay
                }
                Err(err) => self.retry_delay(attempt, err)?,
            };
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn retry_delay(&self, attempt: u32, err: ApiError) -> Result<Duration, ApiError> {
        let decision = self.policy.decide(attempt, AttemptOutcome::Failed(&err));
        if decision.should_retry {
            Ok(decision.delay)
        } else {
            Err(err)
        }
    }
}

impl std::fmt::Debug for RetryingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTransport")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn log_attempt(request: &HttpRequest, attempt: u32, max_retries: u32) {
    tracing::debug!(
        method = request.method.as_str(),
        url = %request.url,
        attempt = attempt + 1,
        max_retries,
        "sending request"
    );
}

/// Waits for the response headers of a streaming request, bounded by `request.timeout`.
async fn open_stream(
    inner: &DynHttpTransport,
    request: HttpRequest,
) -> Result<HttpStreamResponse, ApiError> {
    let Some(limit) = request.timeout else {
        return inner.send_stream(request).await;
    };
    match tokio::time::timeout(limit, inner.send_stream(request)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ApiError::transport(format!(
            "request timed out after {}ms waiting for response headers",
            limit.as_millis()
        ))),
    }
}

/// Reads an error body in full; gives up with an empty body once `limit` elapses.
async fn read_error_body(body: HttpBodyStream, limit: Option<Duration>) -> Vec<u8> {
    let Some(limit) = limit else {
        return collect_body(body).await.unwrap_or_default();
    };
    match tokio::time::timeout(limit, collect_body(body)).await {
        Ok(bytes) => bytes.unwrap_or_default(),
        Err(_) => {
            tracing::debug!(timeout_ms = limit.as_millis() as u64, "gave up reading error body");
            Vec::new()
        }
    }
}

/// Builds the error for a non-2xx response; an undecodable body becomes `None`.
pub(crate) fn status_error(status: u16, body: &[u8]) -> ApiError {
    let decoded: Option<JsonMap> = try_decode_json(body);
    let message = decoded
        .as_ref()
        .and_then(extract_error_message)
        .unwrap_or_else(|| "unexpected status code".to_string());
    ApiError::Status {
        status,
        message,
        body: decoded,
    }
}
