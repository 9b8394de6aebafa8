//! Stream transport: opens a streaming request and yields decoded frames.
//!
//! - `open`: issues the POST and checks the initial response
//! - `sse`: `FrameStream`, the frame decoder over a byte stream
//! - `CancelToken`: cooperative cancellation carrying a typed reason

use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ClientResult, classify_reqwest_error};

pub mod sse;

pub use sse::FrameStream;

/// Standard User-Agent header for hitl requests.
pub const USER_AGENT: &str = concat!("hitl/", env!("CARGO_PKG_VERSION"));

/// Boxed HTTP body stream fed into the frame decoder.
pub type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Why an operation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The operator asked for it (Ctrl+C, `cancel` command).
    User,
    /// A newer operation replaced this one.
    Superseded,
    /// The configured stream timeout elapsed.
    Timeout,
}

impl CancelReason {
    /// User-facing text for a run that ended with this reason.
    pub fn user_message(self) -> &'static str {
        match self {
            CancelReason::User => "Run cancelled by user",
            CancelReason::Superseded => "Run superseded by a newer request",
            CancelReason::Timeout => "Run timed out waiting for the server",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::User => write!(f, "user"),
            CancelReason::Superseded => write!(f, "superseded"),
            CancelReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Cancellation token shared between an operation and its owner.
///
/// The first `cancel` call wins: its reason is the one every clone observes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Does not wait for the operation to observe it.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason recorded by the first `cancel` call.
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Returns the cancellation error if the token has fired.
    ///
    /// # Errors
    /// Returns a `Cancelled` error once `cancel` has been called.
    pub fn check(&self) -> ClientResult<()> {
        if self.is_cancelled() {
            Err(self.error())
        } else {
            Ok(())
        }
    }

    /// The cancellation error for this token's reason.
    pub fn error(&self) -> ClientError {
        ClientError::cancelled(self.reason().unwrap_or(CancelReason::User))
    }

    /// Completes when the token is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Payload of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    /// No data lines, or only whitespace.
    Empty,
    /// Data lines parsed as JSON.
    Json(Value),
    /// Data lines that were not valid JSON, kept verbatim.
    Text(String),
}

impl FrameData {
    /// Parses joined data lines, falling back to the raw string.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return FrameData::Empty;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => FrameData::Json(value),
            Err(err) => {
                tracing::debug!(error = %err, "frame data is not JSON; keeping raw text");
                FrameData::Text(raw.to_string())
            }
        }
    }
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Set only when this frame carried its own `id:` line. The decoder
    /// reports the last event id on every later event too; those repeats are
    /// cleared, so an explicit id equal to the previous one also reads as `None`.
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: FrameData,
}

impl Frame {
    /// Builds a frame from an event name and a JSON payload.
    pub fn json(event: &str, value: Value) -> Self {
        Self {
            id: None,
            event: Some(event.to_string()),
            data: FrameData::Json(value),
        }
    }

    /// Event name, defaulting to `message` like SSE does.
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }

    pub fn as_json(&self) -> Option<&Value> {
        match &self.data {
            FrameData::Json(value) => Some(value),
            _ => None,
        }
    }

    /// True when the frame carries no usable payload.
    pub fn is_empty(&self) -> bool {
        match &self.data {
            FrameData::Empty => true,
            FrameData::Text(text) => text.trim().is_empty(),
            FrameData::Json(value) => match value {
                Value::Null => true,
                Value::Object(map) => map.is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::String(s) => s.trim().is_empty(),
                _ => false,
            },
        }
    }

    /// Single-line rendering of the payload.
    pub fn data_text(&self) -> String {
        match &self.data {
            FrameData::Empty => String::new(),
            FrameData::Text(text) => text.clone(),
            FrameData::Json(value) => value.to_string(),
        }
    }
}

/// Opens a streaming POST and returns the lazy frame sequence.
///
/// The token is checked before the request is sent and raced against the
/// response headers; once the body is streaming, `FrameStream` checks it on
/// every poll.
///
/// # Errors
/// Returns a transport error for network failures or a non-success status,
/// or a cancellation error if the token fires first.
pub async fn open<B: Serialize + ?Sized>(
    http: &reqwest::Client,
    url: &str,
    body: &B,
    cancel: &CancelToken,
) -> ClientResult<FrameStream<ByteStream>> {
    cancel.check()?;

    let request = http
        .post(url)
        .header("content-type", "application/json")
        .header("accept", "text/event-stream")
        .header("user-agent", USER_AGENT)
        .json(body)
        .send();

    let response = tokio::select! {
        () = cancel.cancelled() => return Err(cancel.error()),
        response = request => response.map_err(|e| classify_reqwest_error(&e))?,
    };

    let status = response.status();
    if !status.is_success() {
        let body = body_or_note(response.text().await);
        return Err(ClientError::http_status(status.as_u16(), &body));
    }

    Ok(FrameStream::new(
        response.bytes_stream().boxed(),
        cancel.clone(),
    ))
}

/// Error body text, or a note saying why it could not be read.
fn body_or_note<E: fmt::Display>(body: Result<String, E>) -> String {
    body.unwrap_or_else(|err| format!("(body unreadable: {err})"))
}
