//! Error taxonomy for talking to the workflow server.
//!
//! Every failure that can end an operation is a `ClientError`. Conditions that are
//! only warnings (a stream that produced no frames, a data field that is not JSON)
//! never become errors; they are journaled by the orchestrator instead.

use std::fmt;

use serde_json::Value;

use crate::transport::CancelReason;

/// Error categories for `ClientError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Non-success HTTP status or network failure.
    Transport,
    /// The operation was cancelled; carries why.
    Cancelled(CancelReason),
    /// The request could not be issued with the current session (e.g. resume without a thread).
    Configuration,
    /// The server answered, but not in the documented shape.
    Protocol,
    /// A persisted thread is no longer usable.
    ThreadResolution,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErrorKind::Transport => write!(f, "transport"),
            ClientErrorKind::Cancelled(reason) => write!(f, "cancelled ({reason})"),
            ClientErrorKind::Configuration => write!(f, "configuration"),
            ClientErrorKind::Protocol => write!(f, "protocol"),
            ClientErrorKind::ThreadResolution => write!(f, "thread_resolution"),
        }
    }
}

/// Structured client error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    /// Error category
    pub kind: ClientErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (HTTP body, decoder message)
    pub details: Option<String>,
    /// HTTP status when the server answered with one
    pub status: Option<u16>,
}

impl ClientError {
    /// Creates a new client error.
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            status: None,
        }
    }

    /// Creates an HTTP status error carrying the response body verbatim.
    pub fn http_status(status: u16, body: &str) -> Self {
        // Surface the server's own detail message when it sends one.
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|json| {
                json.get("detail")
                    .or_else(|| json.get("message"))
                    .and_then(Value::as_str)
                    .map(|detail| format!("HTTP {status}: {detail}"))
            })
            .unwrap_or_else(|| format!("HTTP {status}"));

        Self {
            kind: ClientErrorKind::Transport,
            message,
            details: (!body.is_empty()).then(|| body.to_string()),
            status: Some(status),
        }
    }

    /// Creates a network-level transport error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Transport, message)
    }

    /// Creates a cancellation error with the user-facing text for its reason.
    pub fn cancelled(reason: CancelReason) -> Self {
        Self::new(ClientErrorKind::Cancelled(reason), reason.user_message())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Configuration, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Protocol, message)
    }

    pub fn thread_resolution(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::ThreadResolution, message)
    }

    /// Attaches details to an existing error.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns the cancellation reason if this is a cancellation.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self.kind {
            ClientErrorKind::Cancelled(reason) => Some(reason),
            _ => None,
        }
    }

    /// Returns true when the error only means a newer operation took over.
    pub fn is_superseded(&self) -> bool {
        self.cancel_reason() == Some(CancelReason::Superseded)
    }

    /// Message plus details, for journaling and verbose output.
    pub fn display_with_details(&self) -> String {
        match &self.details {
            Some(details) => format!("{}\n{}", self.message, details),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ClientError {}

/// Result type for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Maps a `reqwest` failure onto the transport category.
pub fn classify_reqwest_error(e: &reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::network(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ClientError::network(format!("Connection failed: {e}"))
    } else if e.is_request() {
        ClientError::network(format!("Request error: {e}"))
    } else {
        ClientError::network(format!("Network error: {e}"))
    }
}
