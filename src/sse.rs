//! Server-Sent Events decoding for streamed completions.
//!
//! [`SseDecoder`] is the synchronous part: it buffers bytes, cuts complete frames on the
//! blank-line delimiter and decodes every `data:` payload. [`EventStream`] drives it
//! from an [`HttpBodyStream`], pulling the next chunk only when the caller asks for the
//! next event.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_core::stream::FusedStream;

use crate::decode::decode_json;
use crate::error::ApiError;
use crate::http::HttpBodyStream;
use crate::types::StreamEvent;

/// Payload marking the graceful end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Incremental frame decoder.
///
/// Frame boundaries are unrelated to chunk boundaries: a chunk may carry no frame, part
/// of one, or several. Once the decoder has seen `[DONE]` or produced an error it is
/// finished and ignores further input.
///
/// # Examples
///
/// ```
/// use cerebras_client::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// assert!(decoder.feed(b"data: {\"a\":").is_empty());
/// let events = decoder.feed(b"1}\n\ndata: [DONE]\n\n");
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].as_ref().unwrap()["a"], 1);
/// assert!(decoder.is_finished());
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a delimiter.
    scanned: usize,
    /// Last byte fed was `\r`, so a leading `\n` in the next chunk completes a CRLF.
    after_cr: bool,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` after `[DONE]`, a decode error, or [`SseDecoder::finish`].
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of buffered bytes that do not form a complete frame yet.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a chunk and returns the events of every frame it completes.
    ///
    /// A decode failure is the last element of the returned list.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, ApiError>> {
        let mut events = Vec::new();
        if self.finished || chunk.is_empty() {
            return events;
        }

        self.push_normalized(chunk);

        while let Some(pos) = self.next_delimiter() {
            let frame: Vec<u8> = self.buffer.drain(..pos).collect();
            self.buffer.drain(..FRAME_DELIMITER.len());
            self.scanned = 0;

            self.decode_frame(&frame, &mut events);
            if self.finished {
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// Ends decoding at end of input. Bytes without a closing delimiter are discarded.
    pub fn finish(&mut self) {
        if !self.finished && !self.buffer.is_empty() {
            tracing::debug!(
                trailing_bytes = self.buffer.len(),
                "event stream closed with an incomplete frame; discarding it"
            );
        }
        self.buffer.clear();
        self.scanned = 0;
        self.after_cr = false;
        self.finished = true;
    }

    /// Appends `chunk` with `\r\n` and lone `\r` line endings rewritten to `\n`.
    fn push_normalized(&mut self, chunk: &[u8]) {
        self.buffer.reserve(chunk.len());
        for &byte in chunk {
            match byte {
                b'\r' => {
                    self.buffer.push(b'\n');
                    self.after_cr = true;
                }
                b'\n' if self.after_cr => self.after_cr = false,
                _ => {
                    self.buffer.push(byte);
                    self.after_cr = false;
                }
            }
        }
    }

    fn next_delimiter(&mut self) -> Option<usize> {
        // a delimiter may straddle the previous scan boundary
        let start = self.scanned.saturating_sub(FRAME_DELIMITER.len() - 1);
        let found = self.buffer[start..]
            .windows(FRAME_DELIMITER.len())
            .position(|window| window == FRAME_DELIMITER)
            .map(|offset| start + offset);
        if found.is_none() {
            self.scanned = self.buffer.len();
        }
        found
    }

    fn decode_frame(&mut self, frame: &[u8], events: &mut Vec<Result<StreamEvent, ApiError>>) {
        let text = match std::str::from_utf8(frame) {
            Ok(text) => text,
            Err(err) => {
                events.push(Err(ApiError::Decode {
                    message: format!("invalid UTF-8 in event stream: {err}"),
                    source: None,
                }));
                self.finished = true;
                return;
            }
        };

        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload == DONE_SENTINEL {
                tracing::debug!("event stream finished with [DONE]");
                self.finished = true;
                return;
            }
            if payload.is_empty() {
                continue;
            }
            match decode_json(payload) {
                Ok(map) => events.push(Ok(StreamEvent::from(map))),
                Err(err) => {
                    events.push(Err(err));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Lazy stream of [`StreamEvent`]s read from an SSE body.
///
/// The body is dropped, and its connection released, as soon as the stream ends for any
/// reason: `[DONE]`, end of input, a decode error or a transport failure. Dropping the
/// `EventStream` early has the same effect.
pub struct EventStream {
    body: Option<HttpBodyStream>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamEvent, ApiError>>,
    /// Set once `None` has been returned.
    done: bool,
}

impl EventStream {
    pub fn new(body: HttpBodyStream) -> Self {
        Self {
            body: Some(body),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn release(&mut self) {
        self.body = None;
    }

    fn end(&mut self) -> Poll<Option<Result<StreamEvent, ApiError>>> {
        self.release();
        self.done = true;
        Poll::Ready(None)
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }

            if this.decoder.is_finished() {
                return this.end();
            }

            let Some(body) = this.body.as_mut() else {
                return this.end();
            };

            match body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend(this.decoder.feed(&bytes));
                    if this.decoder.is_finished() {
                        this.release();
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.decoder.finish();
                    this.release();
                    return Poll::Ready(Some(Err(err.into_stream_failure())));
                }
                Poll::Ready(None) => {
                    this.decoder.finish();
                    this.release();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl FusedStream for EventStream {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("decoder", &self.decoder)
            .field("pending", &self.pending.len())
            .field("open", &self.body.is_some())
            .field("done", &self.done)
            .finish()
    }
}
