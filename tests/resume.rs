//! End-to-end reconciliation scenarios over wire-level responses.
//!
//! Each test drives `ResumeContext::reconcile` with a JSON response shaped
//! the way the backend sends it, and checks the decision table plus the
//! resulting mutations of `RunState`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

use runweave::{
    ErrorCode, ResumeContext, ResumePolicy, ResumeStatusResponse, RunConfig, RunIdentity, RunKind,
    RunState, StreamKind,
};

/// Captures ERROR-level log messages so tests can observe absorbed failures.
#[derive(Clone, Default)]
struct ErrorCapture {
    messages: Arc<Mutex<Vec<String>>>,
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for ErrorCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.messages.lock().expect("capture lock").push(message);
        }
    }
}

fn identity() -> RunIdentity {
    RunIdentity::new("proj", "run1")
}

fn context(policy: ResumePolicy) -> ResumeContext {
    ResumeContext::new(identity(), policy)
}

fn parse(value: serde_json::Value) -> ResumeStatusResponse {
    serde_json::from_value(value).expect("parse response")
}

fn absent_response() -> ResumeStatusResponse {
    parse(json!({ "model": null }))
}

/// A fully-populated bucket for a run that logged five steps.
fn started_response() -> ResumeStatusResponse {
    let tail_record = json!({"_step": 5.0, "_runtime": 120.0}).to_string();
    let tail = serde_json::to_string(&vec![tail_record]).expect("tail");
    parse(json!({
        "model": { "bucket": {
            "historyLineCount": 6,
            "eventsLineCount": 2,
            "logLineCount": 14,
            "historyTail": tail,
            "summaryMetrics": json!({"acc": 0.9}).to_string(),
            "config": json!({
                "lr": {"value": 0.9},
                "epochs": {"value": 10},
            }).to_string(),
            "tags": ["b", "c"],
            "startedMarkerBlob": "{\"t\": 1}",
        } }
    }))
}

#[test]
fn absent_run_is_a_noop_except_under_must() {
    for policy in [ResumePolicy::None, ResumePolicy::Allow, ResumePolicy::Never] {
        let mut state = RunState::default();
        let outcome = context(policy).reconcile(&mut state, &absent_response());
        assert!(outcome.is_ok(), "policy {policy} should be a no-op");
        assert_eq!(state.kind, RunKind::New);
        assert_eq!(state.starting_step, 0);
        assert_eq!(state.offsets.get(StreamKind::History), 0);
    }
}

#[test]
fn must_against_absent_run_is_a_usage_error() {
    let mut state = RunState::default();
    let err = context(ResumePolicy::Must)
        .reconcile(&mut state, &absent_response())
        .expect_err("must fail");

    let info = err.to_error_info();
    assert_eq!(info.code, ErrorCode::Usage);
    assert!(info.message.contains("proj/run1"));
    assert!(info.message.contains("resume='allow'"));

    // State is untouched by a refused resume.
    assert_eq!(state.kind, RunKind::New);
    assert_eq!(state.starting_step, 0);
    assert!(state.summary.is_empty());
}

#[test]
fn must_against_precreated_but_unstarted_run_is_a_usage_error() {
    // A scheduler may create the bucket ahead of time; without the started
    // marker it counts as nonexistent.
    let response = parse(json!({
        "model": { "bucket": { "startedMarkerBlob": "{}" } }
    }));
    let mut state = RunState::default();
    let err = context(ResumePolicy::Must)
        .reconcile(&mut state, &response)
        .expect_err("must fail");
    assert_eq!(err.to_error_info().code, ErrorCode::Usage);
}

#[test]
fn never_against_started_run_is_a_usage_error() {
    let mut state = RunState::default();
    let err = context(ResumePolicy::Never)
        .reconcile(&mut state, &started_response())
        .expect_err("must fail");

    let info = err.to_error_info();
    assert_eq!(info.code, ErrorCode::Usage);
    assert!(info.message.contains("proj/run1"));
    assert_eq!(state.kind, RunKind::New);
}

#[test]
fn successful_resume_merges_everything() {
    let mut state = RunState::default();
    context(ResumePolicy::Allow)
        .reconcile(&mut state, &started_response())
        .expect("resume");

    assert_eq!(state.kind, RunKind::Resume);
    assert_eq!(state.offsets.get(StreamKind::History), 6);
    assert_eq!(state.offsets.get(StreamKind::Events), 2);
    assert_eq!(state.offsets.get(StreamKind::Output), 14);
    assert_eq!(state.starting_step, 6);
    assert_eq!(state.runtime, 120);
    assert_eq!(state.summary.len(), 1);
    assert_eq!(state.summary[0].key, "acc");
    assert_eq!(state.summary[0].value_json, "0.9");
    assert_eq!(state.config.get("lr"), Some(&json!(0.9)));
    assert_eq!(state.config.get("epochs"), Some(&json!(10)));
    assert_eq!(state.tags, vec!["b".to_string(), "c".to_string()]);
}

#[test]
fn session_config_keys_win_over_resumed_ones() {
    let mut config = RunConfig::new();
    config.set("lr", json!(0.1));
    let mut state = RunState::new(config, vec![]);

    context(ResumePolicy::Allow)
        .reconcile(&mut state, &started_response())
        .expect("resume");

    assert_eq!(state.config.get("lr"), Some(&json!(0.1)));
    assert_eq!(state.config.get("epochs"), Some(&json!(10)));
}

#[test]
fn session_tags_win_over_resumed_ones() {
    let mut state = RunState::new(RunConfig::new(), vec!["a".to_string()]);
    context(ResumePolicy::Allow)
        .reconcile(&mut state, &started_response())
        .expect("resume");
    assert_eq!(state.tags, vec!["a".to_string()]);
}

#[test]
fn reconciling_the_same_snapshot_twice_is_idempotent_for_offsets() {
    let mut state = RunState::default();
    let ctx = context(ResumePolicy::Allow);
    ctx.reconcile(&mut state, &started_response()).expect("first");
    let offsets_once = state.offsets.clone();
    ctx.reconcile(&mut state, &started_response()).expect("second");
    assert_eq!(state.offsets, offsets_once);
    assert_eq!(state.starting_step, 6);
}

#[test]
fn allow_absorbs_a_bad_summary_and_merges_the_rest() {
    let mut response = started_response();
    if let Some(model) = response.model.as_mut() {
        if let Some(bucket) = model.bucket.as_mut() {
            bucket.summary_metrics = Some("not json".to_string());
        }
    }

    let mut state = RunState::default();
    context(ResumePolicy::Allow)
        .reconcile(&mut state, &response)
        .expect("absorbed");

    assert_eq!(state.kind, RunKind::Resume);
    assert!(state.summary.is_empty(), "summary left at prior state");
    assert_eq!(state.starting_step, 6, "history still merged");
    assert_eq!(state.config.get("epochs"), Some(&json!(10)), "config still merged");
    assert_eq!(state.tags, vec!["b".to_string(), "c".to_string()]);
}

#[test]
fn absorbed_failures_are_logged_at_error_level() {
    let mut response = started_response();
    if let Some(model) = response.model.as_mut() {
        if let Some(bucket) = model.bucket.as_mut() {
            bucket.summary_metrics = Some("not json".to_string());
        }
    }

    let capture = ErrorCapture::default();
    let subscriber = Registry::default().with(capture.clone());

    let mut state = RunState::default();
    tracing::subscriber::with_default(subscriber, || {
        context(ResumePolicy::Allow)
            .reconcile(&mut state, &response)
            .expect("absorbed");
    });

    let messages = capture.messages.lock().expect("capture lock");
    assert_eq!(messages.len(), 1, "one absorbed failure, one error event");
    assert!(messages[0].contains("resume merge step failed"));
    assert!(messages[0].contains("summary metrics"));
}

#[test]
fn must_escalates_a_bad_config_to_unknown() {
    let mut response = started_response();
    if let Some(model) = response.model.as_mut() {
        if let Some(bucket) = model.bucket.as_mut() {
            bucket.config = Some("not json".to_string());
        }
    }

    let mut state = RunState::default();
    let err = context(ResumePolicy::Must)
        .reconcile(&mut state, &response)
        .expect_err("must escalate");

    let info = err.to_error_info();
    assert_eq!(info.code, ErrorCode::Unknown);
    assert!(info.message.contains("proj/run1"));
    // The run is not marked resumed when must escalates.
    assert_eq!(state.kind, RunKind::New);
    // Offsets are established regardless: writers depend on them.
    assert_eq!(state.offsets.get(StreamKind::History), 6);
}

#[test]
fn missing_line_counts_default_to_zero() {
    let response = parse(json!({
        "model": { "bucket": {
            "startedMarkerBlob": "{\"t\": 1}",
            "historyTail": "[]",
            "summaryMetrics": "{}",
            "config": "{}",
        } }
    }));

    let mut state = RunState::default();
    context(ResumePolicy::Allow)
        .reconcile(&mut state, &response)
        .expect("resume");

    assert_eq!(state.kind, RunKind::Resume);
    assert_eq!(state.offsets.get(StreamKind::History), 0);
    assert_eq!(state.offsets.get(StreamKind::Events), 0);
    assert_eq!(state.offsets.get(StreamKind::Output), 0);
    assert_eq!(state.starting_step, 0);
}

#[test]
fn summary_buffer_is_replaced_wholesale() {
    let mut state = RunState::default();
    state.summary = vec![runweave::SummaryItem {
        key: "stale".to_string(),
        value_json: "1".to_string(),
    }];

    context(ResumePolicy::Allow)
        .reconcile(&mut state, &started_response())
        .expect("resume");

    let keys: Vec<&str> = state.summary.iter().map(|item| item.key.as_str()).collect();
    assert_eq!(keys, vec!["acc"]);
}

#[test]
fn resumed_config_roundtrips_through_the_wire_shape() {
    // Values nested under "value" come out flattened; bare entries are
    // skipped as anomalies without failing the merge.
    let response = parse(json!({
        "model": { "bucket": {
            "startedMarkerBlob": "{\"t\": 1}",
            "historyTail": "[]",
            "summaryMetrics": "{}",
            "config": json!({
                "lr": {"value": 0.9},
                "bare": 7,
            }).to_string(),
        } }
    }));

    let mut state = RunState::default();
    context(ResumePolicy::Must)
        .reconcile(&mut state, &response)
        .expect("resume");

    let merged: BTreeMap<&str, &serde_json::Value> = state.config.iter().collect();
    assert_eq!(merged.len(), 1);
    assert_eq!(state.config.get("lr"), Some(&json!(0.9)));
}
