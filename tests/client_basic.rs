use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cerebras_client::http::{
    HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
};
use cerebras_client::retry::FixedJitter;
use cerebras_client::types::{ChatMessage, CompletionRequest, Role};
use cerebras_client::{ApiError, CerebrasClient, ClientConfig, RetryConfig, RetryPolicy};
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};

/// One scripted reply of the mock API.
enum Reply {
    Json(u16, Value),
    Chunks(u16, Vec<&'static str>),
    BrokenStream(Vec<&'static str>),
    NetworkDown,
}

/// Plays back replies in order and keeps the request bodies it received.
struct MockApi {
    replies: Mutex<VecDeque<Reply>>,
    bodies: Mutex<Vec<Value>>,
}

impl MockApi {
    fn with_replies(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            bodies: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, request: &HttpRequest) {
        if let Some(body) = &request.body {
            let value = serde_json::from_slice(body).expect("request body is JSON");
            self.bodies.lock().unwrap().push(value);
        }
    }

    fn next_reply(&self) -> Reply {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected extra request")
    }

    fn calls_left(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    fn last_body(&self) -> Value {
        self.bodies.lock().unwrap().last().cloned().expect("body")
    }
}

fn chunk_stream(chunks: Vec<&'static str>, fail_at_end: bool) -> HttpBodyStream {
    let mut items: Vec<Result<Vec<u8>, ApiError>> = chunks
        .into_iter()
        .map(|chunk| Ok(chunk.as_bytes().to_vec()))
        .collect();
    if fail_at_end {
        items.push(Err(ApiError::transport("connection reset by peer")));
    }
    Box::pin(stream::iter(items))
}

#[async_trait]
impl HttpTransport for MockApi {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.record(&request);
        match self.next_reply() {
            Reply::Json(status, body) => Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: serde_json::to_vec(&body).expect("serialize"),
            }),
            Reply::NetworkDown => Err(ApiError::transport("connection refused")),
            _ => panic!("streaming reply scripted for a buffered call"),
        }
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, ApiError> {
        self.record(&request);
        let (status, body) = match self.next_reply() {
            Reply::Chunks(status, chunks) => (status, chunk_stream(chunks, false)),
            Reply::BrokenStream(chunks) => (200, chunk_stream(chunks, true)),
            Reply::Json(status, body) => {
                let text: &'static str = Box::leak(body.to_string().into_boxed_str());
                (status, chunk_stream(vec![text], false))
            }
            Reply::NetworkDown => return Err(ApiError::transport("connection refused")),
        };
        Ok(HttpStreamResponse {
            status,
            headers: HashMap::new(),
            body,
        })
    }
}

fn client(api: Arc<MockApi>, max_retries: u32) -> CerebrasClient {
    let config = ClientConfig::builder("test-key")
        .with_base_url("http://mock.local")
        .build()
        .expect("config");
    let policy = RetryPolicy::new(RetryConfig {
        max_retries,
        base_delay: Duration::from_millis(1),
        jitter: Duration::ZERO,
    })
    .with_jitter_source(Arc::new(FixedJitter(0)));
    CerebrasClient::with_transport(config, api).with_retry_policy(policy)
}

fn conversation() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a helpful assistant."),
        ChatMessage::user("Write a haiku about the ocean."),
    ]
}

#[tokio::test]
async fn completion_round_trip_appends_assistant_reply() {
    let api = MockApi::with_replies(vec![Reply::Json(
        200,
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Waves fold into foam" },
                "finish_reason": "stop"
            }]
        }),
    )]);
    let messages = conversation();
    let request = CompletionRequest::new("llama3.1-8b", messages.clone())
        .with_temperature(0.5)
        .with_max_tokens(200);

    let result = client(api.clone(), 3)
        .create_completion(request)
        .await
        .expect("completion");

    let sent = api.last_body();
    let sent_messages: Vec<ChatMessage> =
        serde_json::from_value(sent["messages"].clone()).expect("messages");
    assert_eq!(sent_messages, messages);
    assert_eq!(sent["max_tokens"], json!(200));
    assert_eq!(sent["stream"], json!(false));

    let reply = result.first_message().expect("assistant message");
    assert_eq!(reply.role, Role::Assistant);

    let mut history = sent_messages;
    history.push(reply);
    assert_eq!(history.len(), messages.len() + 1);
    assert_eq!(&history[..messages.len()], &messages[..]);
    assert_eq!(history.last(), Some(&ChatMessage::assistant("Waves fold into foam")));
}

#[tokio::test]
async fn transient_failures_are_invisible_to_the_caller() {
    let api = MockApi::with_replies(vec![
        Reply::NetworkDown,
        Reply::Json(503, json!({ "message": "overloaded" })),
        Reply::Json(429, json!({ "message": "slow down" })),
        Reply::Json(200, json!({ "choices": [] })),
    ]);
    let result = client(api.clone(), 3)
        .create_completion(CompletionRequest::new("m", conversation()))
        .await
        .expect("eventually succeeds");
    assert!(result.choices().is_empty());
    assert_eq!(api.calls_left(), 0);
}

#[tokio::test]
async fn exhausted_retries_report_the_last_status() {
    let api = MockApi::with_replies(vec![
        Reply::Json(500, json!({ "message": "boom" })),
        Reply::Json(500, json!({ "message": "boom again" })),
    ]);
    let err = client(api.clone(), 1)
        .create_completion(CompletionRequest::new("m", conversation()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(
        err.body().and_then(|body| body.get("message")),
        Some(&json!("boom again"))
    );
    assert_eq!(api.calls_left(), 0);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let api = MockApi::with_replies(vec![
        Reply::Json(404, json!({ "message": "model not found" })),
        Reply::Json(200, json!({ "choices": [] })),
    ]);
    let err = client(api.clone(), 3)
        .create_completion(CompletionRequest::new("missing", conversation()))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(api.calls_left(), 1);
}

#[tokio::test]
async fn network_errors_surface_without_status() {
    let api = MockApi::with_replies(vec![Reply::NetworkDown, Reply::NetworkDown]);
    let err = client(api, 1).list_models().await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn streamed_deltas_arrive_across_arbitrary_chunks() {
    let api = MockApi::with_replies(vec![Reply::Chunks(
        200,
        vec![
            ": connected\n\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\nda",
            "ta: {\"choices\":[{\"delta\":{\"content\":\"Quantum \"}}]}\n",
            "\ndata: {\"choices\":[{\"delta\":{\"content\":\"links\"}}]}\n\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ],
    )]);
    let mut stream = client(api.clone(), 3)
        .stream_completion(CompletionRequest::new("m", conversation()))
        .await
        .expect("stream");

    let mut fragments = Vec::new();
    let mut finish = None;
    while let Some(event) = stream.next().await {
        let event = event.expect("event");
        if let Some(text) = event.delta_content() {
            fragments.push(text.to_string());
        }
        if let Some(reason) = event.finish_reason() {
            finish = Some(reason.to_string());
        }
    }
    assert_eq!(fragments, vec!["Quantum ", "links"]);
    assert_eq!(finish.as_deref(), Some("stop"));
    assert_eq!(api.last_body()["stream"], json!(true));
}

#[tokio::test]
async fn stream_setup_is_retried_but_body_failures_are_not() {
    let api = MockApi::with_replies(vec![
        Reply::Json(502, json!({ "message": "bad gateway" })),
        Reply::BrokenStream(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n"]),
    ]);
    let mut stream = client(api.clone(), 3)
        .stream_completion(CompletionRequest::new("m", conversation()))
        .await
        .expect("stream");

    let first = stream.next().await.expect("event").expect("ok");
    assert_eq!(first.delta_content(), Some("partial"));

    let err = stream.next().await.expect("error").unwrap_err();
    assert!(matches!(err, ApiError::Stream { .. }), "{err:?}");
    assert!(stream.next().await.is_none());
    assert_eq!(api.calls_left(), 0);
}

#[tokio::test]
async fn malformed_stream_payload_ends_with_decode_error() {
    let api = MockApi::with_replies(vec![Reply::Chunks(
        200,
        vec!["data: {\"choices\":[]}\n\ndata: {\"choices\":\n\ndata: [DONE]\n\n"],
    )]);
    let stream = client(api, 0)
        .stream_completion(CompletionRequest::new("m", conversation()))
        .await
        .expect("stream");
    let items: Vec<_> = stream.collect().await;
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(items[1], Err(ApiError::Decode { .. })));
}

#[tokio::test]
async fn stream_rejected_by_server_reports_status_and_body() {
    let api = MockApi::with_replies(vec![Reply::Json(
        401,
        json!({ "message": "Wrong API Key", "type": "invalid_request_error" }),
    )]);
    let Err(err) = client(api, 3)
        .stream_completion(CompletionRequest::new("m", conversation()))
        .await
    else {
        panic!("expected the stream to be rejected");
    };
    assert_eq!(err.status(), Some(401));
    assert_eq!(
        err.body().and_then(|body| body.get("type")),
        Some(&json!("invalid_request_error"))
    );
}

#[tokio::test]
async fn one_client_serves_concurrent_calls() {
    let replies = (0..8)
        .map(|_| Reply::Json(200, json!({ "data": [{ "id": "llama3.1-8b" }] })))
        .collect();
    let api = MockApi::with_replies(replies);
    let client = client(api.clone(), 0);

    let calls = (0..8).map(|_| {
        let client = client.clone();
        tokio::spawn(async move { client.list_models().await })
    });
    for call in calls.collect::<Vec<_>>() {
        let models = call.await.expect("join").expect("models");
        assert_eq!(models.ids(), vec!["llama3.1-8b"]);
    }
    assert_eq!(api.calls_left(), 0);
}
