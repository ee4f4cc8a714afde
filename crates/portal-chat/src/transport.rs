//! Streaming HTTP transport for the chat endpoint.
//!
//! [`StreamTransport`] POSTs a [`ChatRequest`] and returns an
//! [`EventStream`]: a lazy, finite, non-restartable sequence of
//! [`StreamEvent`]s read from the `text/event-stream` body.
//!
//! The stream ends exactly once, for one [`StreamEnd`] reason:
//!
//! - `[DONE]` sentinel
//! - body closed by the server
//! - cancellation through the [`CancellationToken`] passed to
//!   [`EventSource::open`]
//!
//! Once cancellation is requested no further event is yielded, even if
//! records are already buffered. Records that fail to parse are logged and
//! skipped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use portal_chat_core::{Clock, SystemClock};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::context::ChatRequest;
use crate::decoder::{SseDecoder, SseRecord};
use crate::event::StreamEvent;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the connection failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP error! status: {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// Reading the body failed after the stream opened.
    #[error("stream read failed: {0}")]
    Stream(String),

    /// The request body could not be encoded.
    #[error("failed to encode request: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why an [`EventStream`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEnd {
    /// The server sent the `[DONE]` sentinel.
    Done,
    /// The server closed the body.
    Closed,
    /// The caller cancelled.
    Cancelled,
}

/// Parameters of one streaming request.
#[derive(Debug, Clone, Copy)]
pub struct StreamRequest<'a> {
    /// Full endpoint URL.
    pub endpoint: &'a str,
    /// JSON body.
    pub body: &'a ChatRequest,
    /// Bearer token for the `Authorization` header.
    pub bearer_token: Option<&'a str>,
}

/// Opens event streams.
///
/// This trait allows mocking the network in session tests.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Issue one streaming request.
    ///
    /// A token that is already cancelled, or is cancelled while the request
    /// is in flight, yields a stream that has ended with
    /// [`StreamEnd::Cancelled`] rather than an error.
    async fn open(
        &self,
        request: StreamRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<EventStream, TransportError>;
}

// =============================================================================
// EventStream
// =============================================================================

type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Events decoded from one response body.
pub struct EventStream {
    body: Option<ByteStream>,
    decoder: SseDecoder,
    ready: VecDeque<SseRecord>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    end: Option<StreamEnd>,
    failed: bool,
}

impl EventStream {
    /// Decode events from an arbitrary byte stream.
    pub fn from_byte_stream<S>(body: S, cancel: CancellationToken, clock: Arc<dyn Clock>) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self {
            body: Some(body.boxed()),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            cancel,
            clock,
            end: None,
            failed: false,
        }
    }

    /// A stream that was cancelled before it opened.
    #[must_use]
    pub fn cancelled(cancel: CancellationToken, clock: Arc<dyn Clock>) -> Self {
        let mut stream = Self::from_byte_stream(futures::stream::empty(), cancel, clock);
        stream.body = None;
        stream.end = Some(StreamEnd::Cancelled);
        stream
    }

    /// Why the stream ended; `None` while open or after a read failure.
    #[must_use]
    pub const fn end(&self) -> Option<StreamEnd> {
        self.end
    }

    /// Next event, `None` once the stream has ended.
    ///
    /// A read failure is yielded once as `Some(Err(..))`, after which the
    /// stream is exhausted and [`EventStream::end`] stays `None`.
    pub async fn next(&mut self) -> Option<Result<StreamEvent, TransportError>> {
        loop {
            if self.end.is_some() || self.failed {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.finish(StreamEnd::Cancelled);
                return None;
            }

            if let Some(record) = self.ready.pop_front() {
                match record {
                    SseRecord::Done => {
                        self.finish(StreamEnd::Done);
                        return None;
                    }
                    SseRecord::Data(payload) => {
                        match StreamEvent::parse(&payload, self.clock.as_ref()) {
                            Ok(event) => return Some(Ok(event)),
                            Err(e) => {
                                warn!(
                                    error = %e,
                                    payload = %payload,
                                    "Skipping malformed event record"
                                );
                                continue;
                            }
                        }
                    }
                }
            }

            let Some(body) = self.body.as_mut() else {
                self.finish(StreamEnd::Closed);
                return None;
            };

            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };

            match read {
                None => {
                    self.finish(StreamEnd::Cancelled);
                    return None;
                }
                Some(Some(Ok(chunk))) => {
                    let records = self.decoder.push(&chunk);
                    self.ready.extend(records);
                }
                Some(Some(Err(e))) => {
                    self.failed = true;
                    self.body = None;
                    return Some(Err(e));
                }
                Some(None) => {
                    self.body = None;
                    self.ready.extend(self.decoder.finish());
                }
            }
        }
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent, TransportError>> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
    }

    fn finish(&mut self, reason: StreamEnd) {
        if self.end.is_none() {
            debug!(reason = ?reason, "Event stream ended");
            self.end = Some(reason);
            self.body = None;
            self.ready.clear();
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("open", &self.body.is_some())
            .field("buffered", &self.decoder.buffered())
            .field("ready", &self.ready.len())
            .field("end", &self.end)
            .field("failed", &self.failed)
            .finish()
    }
}

// =============================================================================
// StreamTransport
// =============================================================================

/// HTTP implementation of [`EventSource`].
#[derive(Debug, Clone)]
pub struct StreamTransport {
    client: Client,
    clock: Arc<dyn Clock>,
}

impl StreamTransport {
    /// Create a transport using the connect timeout from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            clock: Arc::new(SystemClock::new()),
        })
    }

    /// Replace the clock used to stamp events.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl EventSource for StreamTransport {
    async fn open(
        &self,
        request: StreamRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<EventStream, TransportError> {
        let body = serde_json::to_vec(request.body)?;

        let mut builder = self
            .client
            .post(request.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .body(body);
        if let Some(token) = request.bearer_token {
            builder = builder.bearer_auth(token);
        }

        debug!(
            endpoint = %request.endpoint,
            thread_id = %request.body.thread_id,
            "Opening chat stream"
        );

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            response = builder.send() => Some(response),
        };
        let Some(response) = sent else {
            debug!("Chat stream cancelled before it opened");
            return Ok(EventStream::cancelled(cancel, Arc::clone(&self.clock)));
        };
        let response = response?;

        let status = response.status();
        if !status.is_success() {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                text = response.text() => Some(text),
            };
            let Some(text) = read else {
                debug!(
                    status = status.as_u16(),
                    "Chat stream cancelled while reading error body"
                );
                return Ok(EventStream::cancelled(cancel, Arc::clone(&self.clock)));
            };
            let body = text.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), "Chat stream opened");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Stream(e.to_string())));
        Ok(EventStream::from_byte_stream(
            body,
            cancel,
            Arc::clone(&self.clock),
        ))
    }
}
