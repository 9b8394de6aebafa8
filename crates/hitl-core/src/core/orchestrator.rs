//! Orchestrator: owns the session and runs one operation at a time.
//!
//! Commands (`start`, `resume`, `cancel`, `reset`, `rehydrate`) act
//! immediately and spawn at most one operation task. The task reports back
//! through the inbox with messages tagged by its `RequestId`; `handle`
//! discards anything from an operation that is no longer current before it
//! can touch the state machine or the thread manager.
//!
//! Each run task performs exactly one state fetch after its stream ends,
//! whatever way it ended. That fetch decides the outcome; the stream is only
//! a progress hint.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::approval::{Decision, InterruptPayload};
use super::events::SessionEvent;
use super::interpret::{DomainEvent, classify};
use super::journal::{LogEntry, LogTag};
use super::machine::{RunState, Trigger};
use super::request_id::{LatestOnly, RequestId};
use super::session::Session;
use super::thread::{ThreadManager, ThreadSource};
use crate::client::{RunRequest, ThreadId, ThreadSnapshot, WorkflowClient};
use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::transport::{CancelReason, CancelToken, Frame};

/// Message from an operation task.
#[derive(Debug)]
pub enum OpMessage {
    ThreadResolved(ThreadId),
    Frame(Frame),
    Finished(OpOutcome),
}

#[derive(Debug)]
pub enum OpOutcome {
    /// A start or resume ran its stream (or failed to) and then fetched state.
    Run {
        /// Frames seen, or why the stream stopped.
        stream: ClientResult<usize>,
        snapshot: ClientResult<ThreadSnapshot>,
    },
    Rehydrate {
        thread: ThreadId,
        snapshot: ClientResult<ThreadSnapshot>,
    },
    /// No thread could be obtained, so nothing was streamed or fetched.
    Failed(ClientError),
}

#[derive(Debug)]
pub struct Tagged {
    pub id: RequestId,
    pub message: OpMessage,
}

pub type OpInbox = mpsc::UnboundedReceiver<Tagged>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Start,
    Resume,
    Rehydrate,
}

#[derive(Debug)]
struct ActiveOp {
    kind: OpKind,
    cancel: CancelToken,
    /// Topic to persist with the thread (start only).
    topic: Option<String>,
    timer: Option<JoinHandle<()>>,
}

impl ActiveOp {
    /// Stops the timeout timer, if any.
    fn retire(self) -> OpKind {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.kind
    }
}

/// Sending half handed to an operation task.
#[derive(Debug, Clone)]
struct OpHandle {
    id: RequestId,
    tx: mpsc::UnboundedSender<Tagged>,
}

impl OpHandle {
    fn send(&self, message: OpMessage) {
        // The receiver only goes away when the front-end is shutting down.
        let _ = self.tx.send(Tagged {
            id: self.id,
            message,
        });
    }
}

pub struct Orchestrator {
    client: WorkflowClient,
    config: Config,
    threads: ThreadManager,
    session: Session,
    ops: LatestOnly,
    active: Option<ActiveOp>,
    tx: mpsc::UnboundedSender<Tagged>,
}

impl Orchestrator {
    pub fn new(client: WorkflowClient, config: Config, threads: ThreadManager) -> (Self, OpInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(config.journal.capacity);
        (
            Self {
                client,
                config,
                threads,
                session,
                ops: LatestOnly::default(),
                active: None,
                tx,
            },
            rx,
        )
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> RunState {
        self.session.state
    }

    pub fn thread(&self) -> Option<&ThreadId> {
        self.threads.current()
    }

    pub fn topic(&self) -> Option<&str> {
        self.threads.topic()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// True while an operation task is current.
    pub fn is_busy(&self) -> bool {
        self.ops.in_flight()
    }

    /// Starts a new run on a fresh thread.
    ///
    /// # Errors
    /// Fails if the session is not idle.
    pub fn start(&mut self, topic: Option<&str>) -> ClientResult<Vec<SessionEvent>> {
        self.require(Trigger::Start)?;
        let topic = self.config.topic_or_default(topic).to_string();
        let source = self.threads.resolve(true)?;

        let mut out = Vec::new();
        self.session.clear_run();
        self.transition(Trigger::Start, &mut out);
        self.log(LogEntry::new(LogTag::Start, format!("Starting run: {topic}")));

        let request = RunRequest::start(&self.config.assistant_id, &topic);
        self.spawn_run(OpKind::Start, source, request, Some(topic));
        Ok(out)
    }

    /// Answers the pending approval request.
    ///
    /// # Errors
    /// Fails if no approval is pending or there is no thread to resume.
    pub fn resume(&mut self, decision: Decision) -> ClientResult<Vec<SessionEvent>> {
        if !self.session.state.decisions().contains(&decision) {
            return Err(ClientError::configuration(format!(
                "No approval is pending (state: {})",
                self.session.state
            )));
        }
        let source = self.threads.resolve(false)?;

        let mut out = Vec::new();
        self.transition(Trigger::Decide, &mut out);
        self.log(
            LogEntry::new(
                LogTag::Resume,
                format!("Resuming with '{}' ({})", decision.token(), decision.action()),
            )
            .with_detail(source_label(&source)),
        );

        let request = RunRequest::resume(&self.config.assistant_id, decision);
        self.spawn_run(OpKind::Resume, source, request, None);
        Ok(out)
    }

    /// Cancels the running stream. The task still fetches state and reports.
    ///
    /// # Errors
    /// Fails if nothing is running.
    pub fn cancel(&mut self) -> ClientResult<Vec<SessionEvent>> {
        let active = self
            .active
            .as_ref()
            .filter(|_| self.session.state.can_cancel())
            .ok_or_else(|| ClientError::configuration("No run in progress"))?;

        active.cancel.cancel(CancelReason::User);
        self.log(LogEntry::new(LogTag::Cancel, "Cancellation requested"));
        Ok(Vec::new())
    }

    /// Returns to idle and forgets the thread and topic.
    ///
    /// # Errors
    /// Fails while a run is starting or resuming.
    pub fn reset(&mut self) -> ClientResult<Vec<SessionEvent>> {
        self.require(Trigger::Reset)?;
        self.supersede();

        let mut out = Vec::new();
        self.transition(Trigger::Reset, &mut out);
        self.session.clear_run();
        if let Err(err) = self.threads.clear() {
            self.warn(&mut out, format!("Failed to clear saved session: {err:#}"));
        }
        self.log(LogEntry::new(LogTag::Reset, "Session reset"));
        Ok(out)
    }

    /// Checks whether the persisted thread is still waiting for approval.
    ///
    /// Returns false (and does nothing) unless idle with a persisted thread.
    pub fn rehydrate(&mut self) -> bool {
        if self.session.state != RunState::Idle {
            return false;
        }
        let Some(thread) = self.threads.current().cloned() else {
            return false;
        };

        let (handle, _) = self.begin(OpKind::Rehydrate, None);
        self.log(LogEntry::new(
            LogTag::Thread,
            format!("Checking saved thread {thread}"),
        ));
        let client = self.client.clone();
        tokio::spawn(async move {
            let snapshot = client.fetch_thread(&thread).await;
            handle.send(OpMessage::Finished(OpOutcome::Rehydrate { thread, snapshot }));
        });
        true
    }

    /// Applies one message from an operation task.
    pub fn handle(&mut self, tagged: Tagged) -> Vec<SessionEvent> {
        let Tagged { id, message } = tagged;
        if !self.ops.is_current(id) {
            tracing::debug!(op = %id, "discarding message from stale operation");
            return Vec::new();
        }

        let mut out = Vec::new();
        match message {
            OpMessage::ThreadResolved(thread) => self.on_thread_resolved(thread, &mut out),
            OpMessage::Frame(frame) => self.on_frame(&frame, &mut out),
            OpMessage::Finished(outcome) => {
                self.ops.finish(id);
                let kind = self.active.take().map(ActiveOp::retire);
                tracing::debug!(op = %id, ?kind, "operation finished");
                self.on_finished(outcome, &mut out);
            }
        }
        out
    }

    /// Handles messages until no operation is current.
    pub async fn settle(&mut self, inbox: &mut OpInbox) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while self.is_busy() {
            let Some(tagged) = inbox.recv().await else {
                break;
            };
            out.extend(self.handle(tagged));
        }
        out
    }

    fn require(&self, trigger: Trigger) -> ClientResult<()> {
        self.session
            .state
            .next(trigger)
            .map(|_| ())
            .map_err(|err| ClientError::configuration(capitalize(&err.to_string())))
    }

    /// Cancels the current operation, if any, and makes its messages stale.
    fn supersede(&mut self) {
        if let Some(previous) = self.active.take() {
            tracing::debug!(kind = ?previous.kind, "superseding operation");
            previous.cancel.cancel(CancelReason::Superseded);
            previous.retire();
        }
        self.ops.supersede();
    }

    fn begin(&mut self, kind: OpKind, topic: Option<String>) -> (OpHandle, CancelToken) {
        self.supersede();
        let id = self.ops.begin();
        let cancel = CancelToken::new();
        self.active = Some(ActiveOp {
            kind,
            cancel: cancel.clone(),
            topic,
            timer: None,
        });
        tracing::debug!(op = %id, ?kind, "operation started");
        let handle = OpHandle {
            id,
            tx: self.tx.clone(),
        };
        (handle, cancel)
    }

    fn spawn_run(
        &mut self,
        kind: OpKind,
        source: ThreadSource,
        request: RunRequest,
        topic: Option<String>,
    ) {
        let (handle, cancel) = self.begin(kind, topic);

        if let Some(timeout) = self.config.stream_timeout()
            && let Some(active) = self.active.as_mut()
        {
            active.timer = Some(tokio::spawn(cancel_after(timeout, cancel.clone())));
        }

        let client = self.client.clone();
        tokio::spawn(async move {
            run_operation(handle, client, source, request, cancel).await;
        });
    }

    fn transition(&mut self, trigger: Trigger, out: &mut Vec<SessionEvent>) -> bool {
        let from = self.session.state;
        match from.next(trigger) {
            Ok(to) => {
                self.session.state = to;
                if from != to {
                    tracing::info!(from = %from, to = %to, "run state changed");
                    out.push(SessionEvent::StateChanged { from, to });
                }
                true
            }
            Err(err) => {
                tracing::warn!(%err, "rejected state transition");
                self.warn(out, capitalize(&err.to_string()));
                false
            }
        }
    }

    fn log(&mut self, entry: LogEntry) {
        self.session.journal.append(entry);
    }

    fn warn(&mut self, out: &mut Vec<SessionEvent>, message: String) {
        tracing::warn!("{message}");
        self.log(LogEntry::new(LogTag::Warn, message.clone()));
        out.push(SessionEvent::Warning(message));
    }

    fn on_thread_resolved(&mut self, thread: ThreadId, out: &mut Vec<SessionEvent>) {
        let topic = self.active.as_ref().and_then(|op| op.topic.clone());
        if let Err(err) = self.threads.persist(thread.clone(), topic.as_deref()) {
            self.warn(out, format!("Failed to save session: {err:#}"));
        }
        self.log(LogEntry::new(LogTag::Thread, format!("Using thread {thread}")));
        out.push(SessionEvent::ThreadAssigned(thread));
    }

    fn on_frame(&mut self, frame: &Frame, out: &mut Vec<SessionEvent>) {
        for event in classify(frame, &self.config.interpret) {
            match event {
                DomainEvent::Interrupt(payload) => self.on_interrupt(payload, out),
                DomainEvent::WorkUpdate { label } => {
                    if self.session.progress.as_deref() != Some(label.as_str()) {
                        self.log(LogEntry::new(LogTag::Step, label.clone()).with_agent(&label));
                        self.session.progress = Some(label.clone());
                        out.push(SessionEvent::Progress(label));
                    }
                }
                DomainEvent::NodeResult {
                    node,
                    text,
                    summary,
                } => {
                    self.log(
                        LogEntry::new(LogTag::Node, summary.clone())
                            .with_agent(&node)
                            .with_detail(text.clone()),
                    );
                    out.push(SessionEvent::NodeFinished {
                        node,
                        summary,
                        text,
                    });
                }
                DomainEvent::StateUpdate { label, detail } => {
                    self.log(
                        LogEntry::new(LogTag::State, format!("State at {label}"))
                            .with_agent(label)
                            .with_detail(detail),
                    );
                }
                DomainEvent::Raw {
                    tag,
                    summary,
                    detail,
                } => {
                    let mut entry = LogEntry::new(LogTag::Raw, format!("[{tag}] {summary}"))
                        .with_detail(detail);
                    if let Some(raw) = frame.as_json() {
                        entry = entry.with_raw(raw.clone());
                    }
                    self.log(entry);
                }
            }
        }
    }

    /// Stores an approval request, entering `waiting_approval` if needed.
    ///
    /// A request equal to the one already waiting is not announced again. A
    /// resumed run that pauses on the same payload is a new request.
    fn on_interrupt(&mut self, payload: InterruptPayload, out: &mut Vec<SessionEvent>) {
        let refreshing = self.session.state == RunState::WaitingApproval;
        if !refreshing && !self.transition(Trigger::Interrupted, out) {
            return;
        }
        if refreshing && self.session.pending.as_ref() == Some(&payload) {
            return;
        }
        self.log(
            LogEntry::new(LogTag::Interrupt, payload.question.clone())
                .with_agent("human_approval")
                .with_detail(payload.options.join(" / ")),
        );
        self.session.pending = Some(payload.clone());
        out.push(SessionEvent::ApprovalRequested(payload));
    }

    fn on_finished(&mut self, outcome: OpOutcome, out: &mut Vec<SessionEvent>) {
        match outcome {
            OpOutcome::Failed(err) => self.fail(err, out),
            OpOutcome::Run { stream, snapshot } => self.resolve_run(stream, snapshot, out),
            OpOutcome::Rehydrate { thread, snapshot } => {
                self.resolve_rehydrate(&thread, snapshot, out);
            }
        }
    }

    fn resolve_run(
        &mut self,
        stream: ClientResult<usize>,
        snapshot: ClientResult<ThreadSnapshot>,
        out: &mut Vec<SessionEvent>,
    ) {
        if matches!(stream, Ok(0)) {
            self.warn(
                out,
                "Stream ended without any frames; resolving from thread state".to_string(),
            );
        }

        let (snapshot, fetch_error) = match snapshot {
            Ok(snapshot) => (Some(snapshot), None),
            Err(err) => {
                self.warn(
                    out,
                    format!("Failed to fetch thread state: {}", err.display_with_details()),
                );
                (None, Some(err))
            }
        };
        let pending = snapshot.as_ref().and_then(ThreadSnapshot::pending_interrupt);
        let report = snapshot
            .as_ref()
            .and_then(ThreadSnapshot::final_report)
            .map(str::to_string);
        if let Some(step) = snapshot.as_ref().and_then(ThreadSnapshot::current_step) {
            self.session.progress = Some(step.to_string());
        }

        // Already paused by an interrupt seen mid-stream.
        if self.session.state == RunState::WaitingApproval {
            if let Err(err) = &stream {
                self.warn(out, format!("Stream ended early: {err}"));
            }
            match pending {
                Some(payload) => self.on_interrupt(payload, out),
                None if snapshot.is_some() => self.warn(
                    out,
                    "Thread state no longer shows the approval request; keeping it".to_string(),
                ),
                None => {}
            }
            return;
        }

        if let Some(payload) = pending {
            self.on_interrupt(payload, out);
        } else if let Some(report) = report {
            self.complete(Some(report), out);
        } else if let Err(err) = stream {
            self.fail(err, out);
        } else if let Some(err) = fetch_error {
            self.fail(err, out);
        } else {
            self.warn(
                out,
                "Run finished without a report or an approval request".to_string(),
            );
            self.complete(None, out);
        }
    }

    fn complete(&mut self, report: Option<String>, out: &mut Vec<SessionEvent>) {
        if !self.transition(Trigger::Completed, out) {
            return;
        }
        self.session.pending = None;
        self.session.empty = report.is_none();
        self.session.report.clone_from(&report);
        let summary = match &report {
            Some(report) => format!("Report ready ({} chars)", report.chars().count()),
            None => "Finished with no report".to_string(),
        };
        self.log(
            LogEntry::new(LogTag::Done, summary)
                .with_agent("report_agent")
                .with_detail(report.clone().unwrap_or_default()),
        );
        out.push(SessionEvent::Completed { report });
    }

    fn fail(&mut self, err: ClientError, out: &mut Vec<SessionEvent>) {
        if !self.transition(Trigger::Failed, out) {
            return;
        }
        tracing::warn!(kind = %err.kind, "run failed: {}", err.message);
        self.session.pending = None;
        let mut entry = LogEntry::new(LogTag::Error, err.message.clone());
        if let Some(details) = &err.details {
            entry = entry.with_detail(details.clone());
        }
        self.log(entry);
        self.session.error = Some(err.clone());
        out.push(SessionEvent::Failed(err));
    }

    fn resolve_rehydrate(
        &mut self,
        thread: &ThreadId,
        snapshot: ClientResult<ThreadSnapshot>,
        out: &mut Vec<SessionEvent>,
    ) {
        match snapshot {
            Ok(snapshot) => match snapshot.pending_interrupt() {
                Some(payload) => {
                    if !self.transition(Trigger::Restore, out) {
                        return;
                    }
                    self.session.progress = snapshot.current_step().map(str::to_string);
                    self.log(LogEntry::new(
                        LogTag::Thread,
                        format!("Restored pending approval on thread {thread}"),
                    ));
                    out.push(SessionEvent::ThreadAssigned(thread.clone()));
                    self.on_interrupt(payload, out);
                }
                None => {
                    // Stale threads are dropped quietly: journal only, no event.
                    let stale = ClientError::thread_resolution(format!(
                        "Discarded thread {thread} (no pending approval, status: {})",
                        snapshot.status().unwrap_or("unknown")
                    ));
                    tracing::info!(kind = %stale.kind, "{}", stale.message);
                    self.log(LogEntry::new(LogTag::Thread, stale.message));
                    if let Err(err) = self.threads.discard() {
                        tracing::warn!(error = %format!("{err:#}"), "failed to save session");
                    }
                }
            },
            Err(err) => self.warn(
                out,
                format!(
                    "Could not check saved thread {thread}: {}; keeping it",
                    err.message
                ),
            ),
        }
    }
}

fn source_label(source: &ThreadSource) -> String {
    match source {
        ThreadSource::Create => "new thread".to_string(),
        ThreadSource::Existing(thread) => format!("thread {thread}"),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

async fn cancel_after(timeout: Duration, cancel: CancelToken) {
    tokio::select! {
        () = tokio::time::sleep(timeout) => cancel.cancel(CancelReason::Timeout),
        () = cancel.cancelled() => {}
    }
}

async fn run_operation(
    handle: OpHandle,
    client: WorkflowClient,
    source: ThreadSource,
    request: RunRequest,
    cancel: CancelToken,
) {
    let thread = match source.obtain(&client, &cancel).await {
        Ok(thread) => thread,
        Err(err) => {
            handle.send(OpMessage::Finished(OpOutcome::Failed(err)));
            return;
        }
    };
    handle.send(OpMessage::ThreadResolved(thread.clone()));

    let stream = stream_frames(&handle, &client, &thread, &request, &cancel).await;
    if let Err(err) = &stream {
        tracing::debug!(op = %handle.id, kind = %err.kind, "stream stopped: {}", err.message);
    }

    let snapshot = client.fetch_thread(&thread).await;
    handle.send(OpMessage::Finished(OpOutcome::Run { stream, snapshot }));
}

/// Forwards frames until the stream ends. Returns the number of frames seen.
async fn stream_frames(
    handle: &OpHandle,
    client: &WorkflowClient,
    thread: &ThreadId,
    request: &RunRequest,
    cancel: &CancelToken,
) -> ClientResult<usize> {
    let mut frames = client.stream_run(thread, request, cancel).await?;
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Err(cancel.error()),
            next = frames.next() => next,
        };
        match next {
            Some(frame) => handle.send(OpMessage::Frame(frame?)),
            None => return Ok(frames.frames_seen()),
        }
    }
}
