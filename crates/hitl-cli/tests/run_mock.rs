use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::tempdir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Build an SSE response body from `(event, data)` pairs.
fn sse_response(frames: &[(&str, Value)]) -> ResponseTemplate {
    let body: String = frames
        .iter()
        .map(|(event, data)| format!("event: {event}\ndata: {data}\n\n"))
        .collect();
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn approval_request(question: &str) -> Value {
    json!({
        "kind": "approval_request",
        "question": question,
        "options": ["y", "n", "retry"],
        "analysis_preview": [{"type": "ai", "content": "Market outlook"}]
    })
}

fn interrupt_stream(question: &str) -> ResponseTemplate {
    sse_response(&[
        ("metadata", json!({"run_id": "run-1"})),
        (
            "updates",
            json!({"market_agent": {"current_step": "market_agent",
                "analysis_messages": [{"type": "ai", "content": "Market outlook"}]}}),
        ),
        (
            "updates",
            json!({"__interrupt__": [{"value": approval_request(question), "id": "int-1"}]}),
        ),
    ])
}

fn report_stream(report: &str) -> ResponseTemplate {
    sse_response(&[
        (
            "updates",
            json!({"report_agent": {"current_step": "report_agent", "final_report": report}}),
        ),
        (
            "values",
            json!({"current_step": "report_agent", "final_report": report}),
        ),
    ])
}

fn interrupted_state(thread: &str, question: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "thread_id": thread,
        "status": "interrupted",
        "values": {"current_step": "human_approval"},
        "interrupts": {"task-1": [{"value": approval_request(question), "id": "int-1"}]}
    }))
}

fn finished_state(thread: &str, report: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "thread_id": thread,
        "status": "idle",
        "values": {"current_step": "report_agent", "final_report": report}
    }))
}

async fn mount_thread_created(server: &MockServer, thread: &str) {
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"thread_id": thread})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_run_stops_at_approval_and_saves_thread() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();

    mount_thread_created(&server, "t-1").await;
    Mock::given(method("POST"))
        .and(path("/threads/t-1/runs/stream"))
        .and(body_partial_json(json!({"assistant_id": "agent"})))
        .respond_with(interrupt_stream("Approve?"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/t-1"))
        .respond_with(interrupted_state("t-1", "Approve?"))
        .mount(&server)
        .await;

    cargo_bin_cmd!("hitl")
        .env("HITL_HOME", home.path())
        .env("HITL_BASE_URL", server.uri())
        .args(["run", "--topic", "Lunar mining"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Approval needed: Approve?"))
        .stdout(predicate::str::contains("accept (y)"))
        .stdout(predicate::str::contains("hitl resume"));

    let saved = fs::read_to_string(home.path().join("session.json")).unwrap();
    assert!(saved.contains("t-1"));
    assert!(saved.contains("Lunar mining"));
}

#[tokio::test]
async fn test_run_with_decision_prints_report() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();

    mount_thread_created(&server, "t-2").await;
    Mock::given(method("POST"))
        .and(path("/threads/t-2/runs/stream"))
        .and(body_partial_json(json!({"input": {"loop_count": 0}})))
        .respond_with(interrupt_stream("Approve?"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/threads/t-2/runs/stream"))
        .and(body_partial_json(json!({"command": {"resume": "y"}})))
        .respond_with(report_stream("Final report body"))
        .expect(1)
        .mount(&server)
        .await;
    // First fetch follows the interrupted stream, the second the report.
    Mock::given(method("GET"))
        .and(path("/threads/t-2"))
        .respond_with(interrupted_state("t-2", "Approve?"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/t-2"))
        .respond_with(finished_state("t-2", "Final report body"))
        .mount(&server)
        .await;

    cargo_bin_cmd!("hitl")
        .env("HITL_HOME", home.path())
        .env("HITL_BASE_URL", server.uri())
        .args(["run", "--topic", "Lunar mining", "--decision", "accept"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Final report body"))
        .stdout(predicate::str::contains("hitl resume").not());
}

#[tokio::test]
async fn test_resume_answers_saved_thread() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();
    fs::write(
        home.path().join("session.json"),
        r#"{"thread_id": "t-3", "topic": "Orbital fuel depots"}"#,
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/threads/t-3"))
        .respond_with(interrupted_state("t-3", "Ship it?"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/t-3"))
        .respond_with(finished_state("t-3", "Depot report"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/threads/t-3/runs/stream"))
        .and(body_partial_json(json!({"command": {"resume": "y"}})))
        .respond_with(report_stream("Depot report"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    cargo_bin_cmd!("hitl")
        .env("HITL_HOME", home.path())
        .env("HITL_BASE_URL", server.uri())
        .args(["resume", "y"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Approval needed: Ship it?"))
        .stdout(predicate::str::contains("Depot report"));
}

#[tokio::test]
async fn test_resume_without_saved_thread_fails() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();

    cargo_bin_cmd!("hitl")
        .env("HITL_HOME", home.path())
        .env("HITL_BASE_URL", server.uri())
        .args(["resume", "accept"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("No saved thread to resume"));
}

#[tokio::test]
async fn test_stream_http_error_exits_with_message() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();

    mount_thread_created(&server, "t-4").await;
    Mock::given(method("POST"))
        .and(path("/threads/t-4/runs/stream"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"detail": "assistant not found"})),
        )
        .mount(&server)
        .await;

    cargo_bin_cmd!("hitl")
        .env("HITL_HOME", home.path())
        .env("HITL_BASE_URL", server.uri())
        .args(["run", "--topic", "Lunar mining"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("HTTP 422: assistant not found"));
}

#[tokio::test]
async fn test_status_without_session() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();

    cargo_bin_cmd!("hitl")
        .env("HITL_HOME", home.path())
        .env("HITL_BASE_URL", server.uri())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("thread:   (none)"))
        .stdout(predicate::str::contains("state:    idle"));
}

#[tokio::test]
async fn test_status_shows_pending_question() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();
    fs::write(
        home.path().join("session.json"),
        r#"{"thread_id": "t-5", "topic": "Space tugs"}"#,
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/threads/t-5"))
        .respond_with(interrupted_state("t-5", "Proceed?"))
        .mount(&server)
        .await;

    cargo_bin_cmd!("hitl")
        .env("HITL_HOME", home.path())
        .env("HITL_BASE_URL", server.uri())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("thread:   t-5"))
        .stdout(predicate::str::contains("topic:    Space tugs"))
        .stdout(predicate::str::contains("pending:  Proceed?"));
}

#[test]
fn test_reset_removes_saved_session() {
    let home = tempdir().unwrap();
    let session = home.path().join("session.json");
    fs::write(&session, r#"{"thread_id": "t-6", "topic": "Space tugs"}"#).unwrap();

    cargo_bin_cmd!("hitl")
        .env("HITL_HOME", home.path())
        .arg("reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("Session cleared"));

    assert!(!session.exists());
}
