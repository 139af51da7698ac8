use std::env;
use std::time::Duration;

use crate::error::ApiError;
use crate::retry::RetryConfig;

/// Host used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.cerebras.ai";
/// Total time allowed for a buffered request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Time allowed to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "CEREBRAS_API_KEY";
/// Environment variable overriding the base URL.
pub const BASE_URL_ENV: &str = "CEREBRAS_BASE_URL";
/// Environment variable holding the organization id.
pub const ORGANIZATION_ENV: &str = "CEREBRAS_ORGANIZATION";

/// Immutable client settings, validated on construction.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cerebras_client::config::ClientConfig;
///
/// let config = ClientConfig::builder("sk-test")
///     .with_organization("org-1")
///     .with_request_timeout(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(config.base_url(), "https://api.cerebras.ai");
/// assert_eq!(config.organization(), Some("org-1"));
///
/// assert!(ClientConfig::new("").is_err());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    api_key: String,
    base_url: String,
    organization: Option<String>,
    request_timeout: Duration,
    connect_timeout: Duration,
    retry: RetryConfig,
}

impl ClientConfig {
    /// Creates a configuration with defaults for everything but the key.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] when `api_key` is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ApiError> {
        Self::builder(api_key).build()
    }

    /// Starts a builder seeded with defaults.
    pub fn builder(api_key: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }

    /// Reads `CEREBRAS_API_KEY`, `CEREBRAS_BASE_URL` and `CEREBRAS_ORGANIZATION`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] when the key variable is missing or blank.
    pub fn from_env() -> Result<Self, ApiError> {
        let api_key = non_blank_var(API_KEY_ENV).ok_or_else(|| ApiError::InvalidConfig {
            field: "api_key",
            reason: format!("{API_KEY_ENV} is not set"),
        })?;
        let mut builder = Self::builder(api_key);
        if let Some(base_url) = non_blank_var(BASE_URL_ENV) {
            builder = builder.with_base_url(base_url);
        }
        if let Some(organization) = non_blank_var(ORGANIZATION_ENV) {
            builder = builder.with_organization(organization);
        }
        builder.build()
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Joins `path` onto the base URL, tolerating a trailing `/` or `/v1`.
    pub(crate) fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{base}/v1/{}", path.trim_start_matches('/'))
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    api_key: String,
    base_url: String,
    organization: Option<String>,
    request_timeout: Duration,
    connect_timeout: Duration,
    retry: RetryConfig,
}

impl ClientConfigBuilder {
    /// Overrides the API host, e.g. for a proxy or a local stub.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sent as `X-Organization` on every request.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] for an empty API key or base URL.
    pub fn build(self) -> Result<ClientConfig, ApiError> {
        if self.api_key.is_empty() {
            return Err(ApiError::InvalidConfig {
                field: "api_key",
                reason: "API key must not be empty".to_string(),
            });
        }
        if self.base_url.trim().is_empty() {
            return Err(ApiError::InvalidConfig {
                field: "base_url",
                reason: "base URL must not be empty".to_string(),
            });
        }
        Ok(ClientConfig {
            api_key: self.api_key,
            base_url: self.base_url,
            organization: self.organization.filter(|org| !org.is_empty()),
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            retry: self.retry,
        })
    }
}

fn non_blank_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
