//! HTTP client for the workflow server's thread and run RPCs.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::approval::{Decision, InterruptPayload, extract_interrupt};
use crate::error::{ClientError, ClientResult, classify_reqwest_error};
use crate::transport::{self, ByteStream, CancelToken, FrameStream, USER_AGENT};

/// Stream modes requested for every run.
pub const STREAM_MODES: [&str; 2] = ["updates", "values"];

/// What the server should do with the run if the client disconnects.
pub const ON_DISCONNECT: &str = "cancel";

/// Opaque server-issued thread identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Wraps a raw id, rejecting blank strings.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Start or resume request for one run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunRequest {
    Start { assistant_id: String, input: Value },
    Resume { assistant_id: String, decision: Decision },
}

impl RunRequest {
    /// Builds the start request for a topic.
    pub fn start(assistant_id: &str, topic: &str) -> Self {
        RunRequest::Start {
            assistant_id: assistant_id.to_string(),
            input: start_input(topic),
        }
    }

    pub fn resume(assistant_id: &str, decision: Decision) -> Self {
        RunRequest::Resume {
            assistant_id: assistant_id.to_string(),
            decision,
        }
    }

    /// JSON body for `POST /threads/{id}/runs/stream`.
    pub fn body(&self) -> RunStreamBody<'_> {
        match self {
            RunRequest::Start {
                assistant_id,
                input,
            } => RunStreamBody {
                assistant_id,
                input: Some(input),
                command: None,
                stream_mode: &STREAM_MODES,
                on_disconnect: ON_DISCONNECT,
            },
            RunRequest::Resume {
                assistant_id,
                decision,
            } => RunStreamBody {
                assistant_id,
                input: None,
                command: Some(ResumeCommand {
                    resume: decision.token(),
                }),
                stream_mode: &STREAM_MODES,
                on_disconnect: ON_DISCONNECT,
            },
        }
    }
}

/// Initial graph state for a fresh run.
pub fn start_input(topic: &str) -> Value {
    json!({
        "research_messages": [{"type": "human", "content": format!("Theme: {topic}")}],
        "loop_count": 0,
        "analysis_messages": [],
    })
}

/// Wire shape of a run request.
#[derive(Debug, Serialize)]
pub struct RunStreamBody<'a> {
    pub assistant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<ResumeCommand>,
    pub stream_mode: &'a [&'static str],
    pub on_disconnect: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ResumeCommand {
    pub resume: &'static str,
}

#[derive(Debug, Deserialize)]
struct CreatedThread {
    #[serde(default)]
    thread_id: Option<String>,
}

/// Thread state as returned by `GET /threads/{id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSnapshot {
    raw: Value,
}

impl ThreadSnapshot {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    fn values_str(&self, key: &str) -> Option<&str> {
        self.raw
            .get("values")
            .and_then(|values| values.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// `values.final_report` when non-empty.
    pub fn final_report(&self) -> Option<&str> {
        self.values_str("final_report")
    }

    /// `values.current_step` when non-empty.
    pub fn current_step(&self) -> Option<&str> {
        self.values_str("current_step")
    }

    /// Top-level status (`idle`, `busy`, `interrupted`, ...).
    pub fn status(&self) -> Option<&str> {
        self.raw.get("status").and_then(Value::as_str)
    }

    /// The pending approval request, if the thread is paused on one.
    pub fn pending_interrupt(&self) -> Option<InterruptPayload> {
        extract_interrupt(&self.raw)
    }
}

/// Client for one workflow server.
#[derive(Debug, Clone)]
pub struct WorkflowClient {
    http: reqwest::Client,
    base_url: String,
}

impl WorkflowClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /threads` with empty metadata.
    ///
    /// # Errors
    /// Returns a transport error on HTTP failure and a protocol error when the
    /// response carries no thread id.
    pub async fn create_thread(&self) -> ClientResult<ThreadId> {
        let url = format!("{}/threads", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("user-agent", USER_AGENT)
            .json(&json!({ "metadata": {} }))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            return Err(ClientError::http_status(status.as_u16(), &body));
        }

        let created: CreatedThread = serde_json::from_str(&body).map_err(|err| {
            ClientError::protocol(format!("Failed to parse create-thread response: {err}"))
                .with_details(body.clone())
        })?;

        created
            .thread_id
            .as_deref()
            .and_then(ThreadId::parse)
            .ok_or_else(|| {
                ClientError::protocol("Server returned no thread_id").with_details(body.clone())
            })
    }

    /// `GET /threads/{id}`.
    ///
    /// # Errors
    /// Returns a transport error on HTTP failure, or a protocol error if the
    /// body is not JSON.
    pub async fn fetch_thread(&self, thread: &ThreadId) -> ClientResult<ThreadSnapshot> {
        let url = format!("{}/threads/{}", self.base_url, thread);
        let response = self
            .http
            .get(&url)
            .header("user-agent", USER_AGENT)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            return Err(ClientError::http_status(status.as_u16(), &body));
        }

        serde_json::from_str::<Value>(&body)
            .map(ThreadSnapshot::new)
            .map_err(|err| {
                ClientError::protocol(format!("Failed to parse thread state: {err}"))
                    .with_details(body)
            })
    }

    /// `POST /threads/{id}/runs/stream`.
    ///
    /// # Errors
    /// Returns a transport or cancellation error if the stream cannot be opened.
    pub async fn stream_run(
        &self,
        thread: &ThreadId,
        request: &RunRequest,
        cancel: &CancelToken,
    ) -> ClientResult<FrameStream<ByteStream>> {
        let url = format!("{}/threads/{}/runs/stream", self.base_url, thread);
        transport::open(&self.http, &url, &request.body(), cancel).await
    }
}
