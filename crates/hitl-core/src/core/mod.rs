//! Session logic: interpretation, state machine, threads and orchestration.

pub mod approval;
pub mod events;
pub mod interpret;
pub mod interrupt;
pub mod journal;
pub mod machine;
pub mod orchestrator;
pub mod request_id;
pub mod session;
pub mod thread;

pub use approval::{Decision, InterruptPayload, PreviewItem};
pub use events::SessionEvent;
pub use journal::{LogEntry, LogJournal, LogTag};
pub use machine::RunState;
pub use orchestrator::{OpInbox, Orchestrator};
pub use thread::{SessionStore, ThreadManager};
