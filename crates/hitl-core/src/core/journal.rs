//! Bounded diagnostic journal, newest entry first.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    Start,
    Resume,
    Thread,
    Step,
    Node,
    State,
    Interrupt,
    Raw,
    Warn,
    Error,
    Done,
    Reset,
    Cancel,
}

impl LogTag {
    pub fn as_str(self) -> &'static str {
        match self {
            LogTag::Start => "start",
            LogTag::Resume => "resume",
            LogTag::Thread => "thread",
            LogTag::Step => "step",
            LogTag::Node => "node",
            LogTag::State => "state",
            LogTag::Interrupt => "interrupt",
            LogTag::Raw => "raw",
            LogTag::Warn => "warn",
            LogTag::Error => "error",
            LogTag::Done => "done",
            LogTag::Reset => "reset",
            LogTag::Cancel => "cancel",
        }
    }
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub tag: LogTag,
    /// Workflow node the entry is about, if any.
    pub agent: Option<String>,
    pub summary: String,
    pub detail: String,
    pub raw: Option<Value>,
}

impl LogEntry {
    pub fn new(tag: LogTag, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            tag,
            agent: None,
            summary: summary.into(),
            detail: String::new(),
            raw: None,
        }
    }

    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    #[must_use]
    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogJournal {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds an entry at the front, evicting the oldest once full.
    pub fn append(&mut self, entry: LogEntry) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
