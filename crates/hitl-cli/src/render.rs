//! Terminal output.
//!
//! Results (node summaries, approval requests, the report) go to stdout.
//! Progress, warnings and errors go to stderr.

use hitl_core::core::interpret::summarize;
use hitl_core::core::{Decision, InterruptPayload, LogJournal, Orchestrator, SessionEvent};
use hitl_core::error::ClientError;

const PREVIEW_CHARS: usize = 200;

/// Prints session events. Failures are left to the caller unless `show_failures`.
pub fn events(events: &[SessionEvent], show_failures: bool) {
    for event in events {
        match event {
            SessionEvent::StateChanged { to, .. } => eprintln!("· {to}"),
            SessionEvent::ThreadAssigned(thread) => eprintln!("· thread {thread}"),
            SessionEvent::Progress(step) => eprintln!("▸ {step}"),
            SessionEvent::NodeFinished { node, summary, .. } => println!("[{node}] {summary}"),
            SessionEvent::ApprovalRequested(payload) => approval(payload),
            SessionEvent::Completed { report: Some(report) } => {
                println!();
                println!("{report}");
            }
            SessionEvent::Completed { report: None } => println!("Run finished without a report."),
            SessionEvent::Failed(err) => {
                if show_failures {
                    failure(err);
                }
            }
            SessionEvent::Warning(message) => eprintln!("warning: {message}"),
        }
    }
}

pub fn failure(err: &ClientError) {
    eprintln!("Error: {}", err.display_with_details());
}

pub fn approval(payload: &InterruptPayload) {
    println!();
    println!("Approval needed: {}", payload.question);
    for item in &payload.analysis_preview {
        println!("  - [{}] {}", item.kind, summarize(&item.content, PREVIEW_CHARS));
    }
    let choices: Vec<String> = payload
        .options
        .iter()
        .map(|token| match Decision::from_token(token) {
            Some(decision) if decision.action() != token.as_str() => {
                format!("{} ({token})", decision.action())
            }
            _ => token.clone(),
        })
        .collect();
    println!("Options: {}", choices.join(", "));
}

pub fn status(orch: &Orchestrator) {
    let session = orch.session();
    println!("server:   {}", orch.base_url());
    println!(
        "thread:   {}",
        orch.thread().map_or("(none)", |t| t.as_str())
    );
    println!("topic:    {}", orch.topic().unwrap_or("(none)"));
    println!("state:    {}", session.state());
    if let Some(step) = session.progress() {
        println!("step:     {step}");
    }
    if let Some(payload) = session.pending() {
        println!("pending:  {}", payload.question);
    }
    if let Some(report) = session.report() {
        println!("report:   {}", summarize(report, 80));
    } else if session.is_empty_outcome() {
        println!("report:   (empty)");
    }
    if let Some(err) = session.error() {
        println!("error:    {}", err.message);
    }
}

/// Prints up to `limit` journal entries, newest first.
pub fn journal(journal: &LogJournal, limit: usize) {
    if journal.is_empty() {
        println!("(journal is empty)");
        return;
    }
    for entry in journal.iter().take(limit) {
        let agent = entry
            .agent
            .as_deref()
            .map(|a| format!(" {a}:"))
            .unwrap_or_default();
        println!(
            "{} {:<9}{agent} {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.tag,
            entry.summary
        );
    }
}

pub fn help() {
    println!("Commands:");
    println!("  start [topic]            start a new run (blank topic uses the default)");
    println!("  accept | y               approve and generate the report");
    println!("  retry                    run the analysis again");
    println!("  reject | n               stop without a report");
    println!("  cancel                   cancel the running stream (or press Ctrl+C)");
    println!("  reset                    forget the thread and return to idle");
    println!("  status                   show the session");
    println!("  log [n]                  show the last n journal entries (default 20)");
    println!("  help                     show this help");
    println!("  quit                     exit");
}
