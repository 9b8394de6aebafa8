//! What the orchestrator tells the front-end.

use super::approval::InterruptPayload;
use super::machine::RunState;
use crate::client::ThreadId;
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { from: RunState, to: RunState },
    /// The thread the current run uses.
    ThreadAssigned(ThreadId),
    /// Current workflow step label.
    Progress(String),
    NodeFinished {
        node: String,
        summary: String,
        text: String,
    },
    ApprovalRequested(InterruptPayload),
    /// Terminal success; `report` is `None` for an empty outcome.
    Completed { report: Option<String> },
    Failed(ClientError),
    /// Non-fatal condition worth showing.
    Warning(String),
}
