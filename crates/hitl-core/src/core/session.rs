//! Per-session state owned by the orchestrator.

use super::approval::InterruptPayload;
use super::journal::LogJournal;
use super::machine::RunState;
use crate::error::ClientError;

#[derive(Debug)]
pub struct Session {
    pub(crate) state: RunState,
    /// Live approval request; set only in or through `waiting_approval`.
    pub(crate) pending: Option<InterruptPayload>,
    pub(crate) report: Option<String>,
    /// `done` without a report.
    pub(crate) empty: bool,
    pub(crate) progress: Option<String>,
    pub(crate) error: Option<ClientError>,
    pub(crate) journal: LogJournal,
}

impl Session {
    pub fn new(journal_capacity: usize) -> Self {
        Self {
            state: RunState::Idle,
            pending: None,
            report: None,
            empty: false,
            progress: None,
            error: None,
            journal: LogJournal::new(journal_capacity),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn pending(&self) -> Option<&InterruptPayload> {
        self.pending.as_ref()
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    pub fn is_empty_outcome(&self) -> bool {
        self.empty
    }

    pub fn progress(&self) -> Option<&str> {
        self.progress.as_deref()
    }

    pub fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }

    pub fn journal(&self) -> &LogJournal {
        &self.journal
    }

    /// Clears the run outcome. The journal is kept.
    pub(crate) fn clear_run(&mut self) {
        self.pending = None;
        self.report = None;
        self.empty = false;
        self.progress = None;
        self.error = None;
    }
}
