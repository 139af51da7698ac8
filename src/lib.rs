//! Async client for the Cerebras chat-completion API.
//!
//! Every call goes through a retrying transport (network failures, `429` and `5xx` are
//! retried with exponential backoff) and streamed completions are decoded from
//! Server-Sent Events into JSON deltas as they arrive.

pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod http;
pub mod retry;
pub mod sse;
pub mod types;

pub use client::{CerebrasClient, CompletionStream, collect_content};
pub use config::ClientConfig;
pub use error::ApiError;
pub use retry::{RetryConfig, RetryPolicy};
pub use types::*;
