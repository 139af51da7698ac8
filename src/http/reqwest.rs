use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Method};

use crate::config::ClientConfig;
use crate::error::ApiError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport,
};

/// Default [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wraps an already configured `reqwest::Client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client with the connect timeout from `config`.
    ///
    /// The request timeout also bounds every single body read, so a stream that goes
    /// silent fails instead of hanging. It caps the total duration of buffered requests
    /// only; long-running streams are not cut off while data keeps arriving.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.request_timeout())
            .build()
            .map(Self::new)
            .map_err(|err| ApiError::transport_with("failed to create reqwest client", err))
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        }
    }

    fn build_request(&self, mut request: HttpRequest) -> Result<reqwest::RequestBuilder, ApiError> {
        let method = Self::method(request.method);
        let mut builder = self.client.request(method, &request.url);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        for (name, value) in request.headers.drain() {
            let header_name =
                reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                    ApiError::Validation {
                        message: format!("invalid header name: {err}"),
                    }
                })?;
            let header_value = reqwest::header::HeaderValue::from_str(&value).map_err(|err| {
                ApiError::Validation {
                    message: format!("invalid header value for {header_name}: {err}"),
                }
            })?;
            builder = builder.header(header_name, header_value);
        }

        if let Some(body) = request.body.take() {
            builder = builder.body(body);
        }

        Ok(builder)
    }

    /// Like [`ReqwestTransport::build_request`] without the total timeout, which would
    /// cut off the body. Waiting for headers is bounded by the caller.
    fn build_stream_request(
        &self,
        mut request: HttpRequest,
    ) -> Result<reqwest::RequestBuilder, ApiError> {
        request.timeout = None;
        self.build_request(request)
    }

    fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_builder() {
        return ApiError::Validation {
            message: format!("failed to build request: {err}"),
        };
    }
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    };
    ApiError::transport_with(message, err)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(map_reqwest_error)?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, ApiError> {
        let response = self
            .build_stream_request(request)?
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(map_reqwest_error));
        let body: HttpBodyStream = Box::pin(stream);

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Builds a shareable transport for `config`.
pub fn dyn_transport_for(config: &ClientConfig) -> Result<DynHttpTransport, ApiError> {
    Ok(Arc::new(ReqwestTransport::from_config(config)?))
}
