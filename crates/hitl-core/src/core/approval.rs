//! Approval gate: interrupt payload extraction and decision tokens.
//!
//! The server may put the approval request in any of four places depending on
//! whether it came from a stream frame or a thread fetch. `extract_interrupt`
//! tries each location in a fixed order and normalizes the first structurally
//! valid candidate, so every location yields the same `InterruptPayload`.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::ClientError;

/// `kind` value the approval node puts on its payload.
pub const APPROVAL_KIND: &str = "approval_request";

/// Question shown when the payload carries none.
pub const DEFAULT_QUESTION: &str = "Approve the discussion so far and generate the report?";

/// A human decision at the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Accept,
    Retry,
    Reject,
}

impl Decision {
    /// All decisions in canonical order.
    pub const ALL: [Decision; 3] = [Decision::Accept, Decision::Retry, Decision::Reject];

    /// Wire token sent as `command.resume`.
    pub fn token(self) -> &'static str {
        match self {
            Decision::Accept => "y",
            Decision::Retry => "retry",
            Decision::Reject => "n",
        }
    }

    /// UI action name.
    pub fn action(self) -> &'static str {
        match self {
            Decision::Accept => "accept",
            Decision::Retry => "retry",
            Decision::Reject => "reject",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.token() == token)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Decision {
    type Err = ClientError;

    /// Accepts a wire token (`y`, `retry`, `n`) or a UI action name
    /// (`accept`, `retry`, `reject`). Nothing else.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|d| d.token() == normalized || d.action() == normalized)
            .ok_or_else(|| {
                ClientError::configuration(format!(
                    "Unknown decision '{}'; expected one of: accept (y), retry, reject (n)",
                    input.trim()
                ))
            })
    }
}

/// One message excerpt shown next to the approval question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewItem {
    pub kind: String,
    pub content: String,
}

/// Normalized approval request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptPayload {
    pub kind: String,
    pub question: String,
    /// Decision tokens in server order, without duplicates.
    pub options: Vec<String>,
    pub analysis_preview: Vec<PreviewItem>,
}

impl InterruptPayload {
    /// Payload used when the server reports `interrupted` without a structure.
    pub fn synthesized() -> Self {
        Self {
            kind: APPROVAL_KIND.to_string(),
            question: DEFAULT_QUESTION.to_string(),
            options: canonical_options(),
            analysis_preview: Vec::new(),
        }
    }

    fn from_candidate(item: &Value) -> Self {
        let kind = item
            .get("kind")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(APPROVAL_KIND)
            .to_string();

        let question = item
            .get("question")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_QUESTION)
            .to_string();

        let mut options: Vec<String> = Vec::new();
        for option in item
            .get("options")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(token) = option.as_str().map(str::trim)
                && !token.is_empty()
                && !options.iter().any(|o| o == token)
            {
                options.push(token.to_string());
            }
        }
        if options.is_empty() {
            options = canonical_options();
        }

        let analysis_preview = preview_field(item)
            .and_then(Value::as_array)
            .map(|items| items.iter().map(preview_item).collect())
            .unwrap_or_default();

        Self {
            kind,
            question,
            options,
            analysis_preview,
        }
    }
}

fn canonical_options() -> Vec<String> {
    Decision::ALL.iter().map(|d| d.token().to_string()).collect()
}

fn preview_field(item: &Value) -> Option<&Value> {
    item.get("analysisPreview")
        .or_else(|| item.get("analysis_preview"))
}

fn preview_item(value: &Value) -> PreviewItem {
    match value {
        Value::Object(map) => PreviewItem {
            kind: map
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("message")
                .to_string(),
            content: map.get("content").map(stringify).unwrap_or_default(),
        },
        other => PreviewItem {
            kind: "text".to_string(),
            content: stringify(other),
        },
    }
}

/// Renders a JSON value as display text; strings are taken verbatim.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn root_interrupt(v: &Value) -> Option<&Value> {
    v.get("__interrupt__")
}

fn values_interrupt(v: &Value) -> Option<&Value> {
    v.get("values")?.get("__interrupt__")
}

fn root_interrupts(v: &Value) -> Option<&Value> {
    v.get("interrupts")
}

fn values_interrupts(v: &Value) -> Option<&Value> {
    v.get("values")?.get("interrupts")
}

/// Interrupt locations in priority order.
const INTERRUPT_LOCATIONS: [fn(&Value) -> Option<&Value>; 4] = [
    root_interrupt,
    values_interrupt,
    root_interrupts,
    values_interrupts,
];

fn is_payload(item: &Value) -> bool {
    if !item.is_object() {
        return false;
    }
    let approval_kind = item.get("kind").and_then(Value::as_str) == Some(APPROVAL_KIND);
    let has_question = item
        .get("question")
        .and_then(Value::as_str)
        .is_some_and(|q| !q.trim().is_empty());
    approval_kind || has_question || preview_field(item).is_some()
}

/// Reduces a location's content to one candidate object.
fn unwrap_candidate(found: &Value) -> Option<&Value> {
    let mut item = found;

    // Thread fetches key pending interrupts by task id: {task: [..]}.
    if let Value::Object(map) = item
        && !map.contains_key("value")
        && !is_payload(item)
        && let Some(first @ Value::Array(_)) = map.values().next()
    {
        item = first;
    }

    if let Value::Array(items) = item {
        item = items.first()?;
    }

    if let Some(inner) = item.get("value") {
        item = inner;
    }

    Some(item)
}

/// Finds and normalizes the approval request carried by `payload`.
pub fn extract_interrupt(payload: &Value) -> Option<InterruptPayload> {
    let found = INTERRUPT_LOCATIONS
        .iter()
        .filter_map(|locate| locate(payload))
        .filter_map(unwrap_candidate)
        .find(|candidate| is_payload(candidate));

    if let Some(candidate) = found {
        return Some(InterruptPayload::from_candidate(candidate));
    }

    if payload.get("status").and_then(Value::as_str) == Some("interrupted") {
        // Could equally be an upstream bug that dropped the payload.
        tracing::warn!("thread is interrupted without an approval payload; using defaults");
        return Some(InterruptPayload::synthesized());
    }

    None
}
