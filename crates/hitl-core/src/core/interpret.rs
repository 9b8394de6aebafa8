//! Event interpreter: turns one stream frame into domain events.
//!
//! `classify` is pure. It never touches session state; the orchestrator
//! decides what each event means for the run.

use serde_json::{Map, Value};
use unicode_segmentation::UnicodeSegmentation;

use super::approval::{InterruptPayload, extract_interrupt, stringify};
use crate::config::InterpretConfig;
use crate::transport::Frame;

const ELLIPSIS: &str = "…";

/// What a frame means to the workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// The run paused at the approval gate.
    Interrupt(InterruptPayload),
    /// The workflow reported which step it is on.
    WorkUpdate { label: String },
    /// A known node finished and produced output.
    NodeResult {
        node: String,
        text: String,
        summary: String,
    },
    /// A full state snapshot with a step label.
    StateUpdate { label: String, detail: String },
    /// Anything else, only produced in verbose mode.
    Raw {
        tag: String,
        summary: String,
        detail: String,
    },
}

/// Classifies a frame. Returns events in emission order.
pub fn classify(frame: &Frame, config: &InterpretConfig) -> Vec<DomainEvent> {
    let event = frame.event_name();

    if let Some(payload) = frame.as_json().and_then(extract_interrupt) {
        return vec![DomainEvent::Interrupt(payload)];
    }

    if config.noise_events.iter().any(|noise| noise == event) {
        return raw_if_verbose(frame, config).into_iter().collect();
    }

    let mut events = Vec::new();

    if let Some(data) = frame.as_json() {
        let values = values_mapping(event, data);
        let updates = updates_mapping(event, data);

        if let Some(label) = step_label(values, updates) {
            events.push(DomainEvent::WorkUpdate { label });
        }

        if let Some(updates) = updates {
            for (node, state) in updates {
                if config.node_keys.iter().any(|key| key == node) {
                    let text = node_text(state, &config.message_fields);
                    events.push(DomainEvent::NodeResult {
                        node: node.clone(),
                        summary: summarize(&text, config.summary_chars),
                        text,
                    });
                }
            }
        }

        if event == "values"
            && let Some(label) = values.and_then(current_step)
        {
            events.push(DomainEvent::StateUpdate {
                label: label.to_string(),
                detail: pretty(data),
            });
        }
    }

    if events.is_empty() {
        return raw_if_verbose(frame, config).into_iter().collect();
    }
    events
}

/// Collapses whitespace and truncates to `max` grapheme clusters.
pub fn summarize(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.graphemes(true).count() <= max {
        return collapsed;
    }
    let mut out: String = collapsed.graphemes(true).take(max).collect();
    out.push_str(ELLIPSIS);
    out
}

fn raw_if_verbose(frame: &Frame, config: &InterpretConfig) -> Option<DomainEvent> {
    if !config.verbose || frame.is_empty() {
        return None;
    }
    let detail = frame.as_json().map_or_else(|| frame.data_text(), pretty);
    Some(DomainEvent::Raw {
        tag: frame.event_name().to_string(),
        summary: summarize(&frame.data_text(), config.summary_chars),
        detail,
    })
}

fn values_mapping<'a>(event: &str, data: &'a Value) -> Option<&'a Map<String, Value>> {
    match data.get("values") {
        Some(values) => values.as_object(),
        None if event == "values" => data.as_object(),
        None => None,
    }
}

fn updates_mapping<'a>(event: &str, data: &'a Value) -> Option<&'a Map<String, Value>> {
    match data.get("updates") {
        Some(updates) => updates.as_object(),
        None if event == "updates" => data.as_object(),
        None => None,
    }
}

fn current_step(state: &Map<String, Value>) -> Option<&str> {
    state
        .get("current_step")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn step_label(
    values: Option<&Map<String, Value>>,
    updates: Option<&Map<String, Value>>,
) -> Option<String> {
    if let Some(label) = values.and_then(current_step) {
        return Some(label.to_string());
    }
    updates?
        .values()
        .filter_map(Value::as_object)
        .find_map(current_step)
        .map(str::to_string)
}

/// Text for a node's state: report, then latest message, then a dump.
fn node_text(state: &Value, message_fields: &[String]) -> String {
    if let Some(report) = state
        .get("final_report")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
    {
        return report.to_string();
    }

    let latest = message_fields
        .iter()
        .filter_map(|field| state.get(field).and_then(Value::as_array))
        .find(|messages| !messages.is_empty())
        .and_then(|messages| messages.last());

    if let Some(message) = latest {
        let body = ["content", "text", "message"]
            .iter()
            .find_map(|key| message.get(*key));
        return match body {
            Some(body) => stringify(body),
            None => stringify(message),
        };
    }

    pretty(state)
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transport::FrameData;

    fn config() -> InterpretConfig {
        InterpretConfig::default()
    }

    fn verbose() -> InterpretConfig {
        InterpretConfig {
            verbose: true,
            ..InterpretConfig::default()
        }
    }

    #[test]
    fn test_interrupt_stops_classification() {
        let frame = Frame::json(
            "updates",
            json!({
                "__interrupt__": [{"value": {"kind": "approval_request", "question": "Approve?"}}],
                "market_agent": {"current_step": "market_agent"}
            }),
        );

        let events = classify(&frame, &config());
        assert_eq!(events.len(), 1);
        let DomainEvent::Interrupt(payload) = &events[0] else {
            panic!("expected interrupt, got {events:?}");
        };
        assert_eq!(payload.question, "Approve?");
    }

    #[test]
    fn test_noise_is_dropped_unless_verbose() {
        let frame = Frame::json("metadata", json!({"run_id": "r-1"}));
        assert!(classify(&frame, &config()).is_empty());

        let events = classify(&frame, &verbose());
        assert!(matches!(&events[..], [DomainEvent::Raw { tag, .. }] if tag == "metadata"));
    }

    #[test]
    fn test_empty_payload_never_emitted() {
        let frame = Frame {
            id: None,
            event: Some("debug".to_string()),
            data: FrameData::Empty,
        };
        assert!(classify(&frame, &verbose()).is_empty());
        assert!(classify(&Frame::json("ping", json!({})), &verbose()).is_empty());
    }

    #[test]
    fn test_updates_frame_yields_step_then_node_result() {
        let frame = Frame::json(
            "updates",
            json!({
                "market_agent": {
                    "current_step": "market_agent",
                    "analysis_messages": [
                        {"type": "ai", "content": "first"},
                        {"type": "ai", "content": "Demand is   growing\nfast"}
                    ]
                }
            }),
        );

        let events = classify(&frame, &config());
        assert_eq!(
            events,
            vec![
                DomainEvent::WorkUpdate {
                    label: "market_agent".to_string()
                },
                DomainEvent::NodeResult {
                    node: "market_agent".to_string(),
                    text: "Demand is   growing\nfast".to_string(),
                    summary: "Demand is growing fast".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_step_label_scans_updates_in_insertion_order() {
        let frame = Frame::json(
            "updates",
            json!({
                "unknown_node": {"loop_count": 1},
                "zeta": {"current_step": "zeta_step"},
                "alpha": {"current_step": "alpha_step"}
            }),
        );
        let events = classify(&frame, &config());
        assert_eq!(
            events,
            vec![DomainEvent::WorkUpdate {
                label: "zeta_step".to_string()
            }]
        );
    }

    #[test]
    fn test_node_text_priority() {
        let fields = config().message_fields;

        let with_report = json!({"final_report": "R", "analysis_messages": [{"content": "m"}]});
        assert_eq!(node_text(&with_report, &fields), "R");

        let skips_empty_field = json!({
            "analysis_messages": [],
            "research_messages": [{"text": "from research"}]
        });
        assert_eq!(node_text(&skips_empty_field, &fields), "from research");

        let structured = json!({"messages": [{"content": ["a", "b"]}]});
        assert_eq!(node_text(&structured, &fields), r#"["a","b"]"#);

        let bare_string = json!({"messages": ["plain"]});
        assert_eq!(node_text(&bare_string, &fields), "plain");

        let dump = json!({"loop_count": 2});
        assert_eq!(node_text(&dump, &fields), "{\n  \"loop_count\": 2\n}");
    }

    #[test]
    fn test_values_frame_with_step_yields_state_update() {
        let frame = Frame::json(
            "values",
            json!({"current_step": "report_agent", "final_report": "R"}),
        );
        let events = classify(&frame, &config());

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            DomainEvent::WorkUpdate {
                label: "report_agent".to_string()
            }
        );
        assert!(
            matches!(&events[1], DomainEvent::StateUpdate { label, detail } if label == "report_agent" && detail.contains("\"final_report\": \"R\""))
        );
    }

    #[test]
    fn test_unlabelled_values_frame_is_noise() {
        let frame = Frame::json("values", json!({"final_report": "R"}));
        assert!(classify(&frame, &config()).is_empty());

        let events = classify(&frame, &verbose());
        assert!(matches!(&events[..], [DomainEvent::Raw { tag, .. }] if tag == "values"));
    }

    #[test]
    fn test_text_frame_is_raw_when_verbose() {
        let frame = Frame {
            id: None,
            event: Some("debug".to_string()),
            data: FrameData::Text("not json".to_string()),
        };
        assert!(classify(&frame, &config()).is_empty());
        assert_eq!(
            classify(&frame, &verbose()),
            vec![DomainEvent::Raw {
                tag: "debug".to_string(),
                summary: "not json".to_string(),
                detail: "not json".to_string(),
            }]
        );
    }

    #[test]
    fn test_custom_node_keys() {
        let config = InterpretConfig {
            node_keys: vec!["planner".to_string()],
            ..InterpretConfig::default()
        };
        let frame = Frame::json("updates", json!({"planner": {"messages": [{"content": "plan"}]}}));
        assert!(matches!(
            &classify(&frame, &config)[..],
            [DomainEvent::NodeResult { node, .. }] if node == "planner"
        ));
    }

    #[test]
    fn test_summarize_truncates_by_grapheme() {
        assert_eq!(summarize("short", 10), "short");
        assert_eq!(summarize("abcdef", 3), "abc…");
        assert_eq!(summarize("宇宙ゴミの回収", 2), "宇宙…");
        assert_eq!(summarize("👨‍👩‍👧x", 1), "👨‍👩‍👧…");
        assert_eq!(summarize("", 3), "");
    }
}
