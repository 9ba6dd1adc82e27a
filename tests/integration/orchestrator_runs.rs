//! Orchestrator run integration tests.
//!
//! These tests verify event ordering, runtime spawning, failure isolation,
//! degraded fallbacks, caching and sink hand-off over complete runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use ripple::core::{EventKind, ProgressEvent, TaskNode, Validator};
use ripple::orchestration::{BackendError, ResultCache, RunOptions};
use ripple::sink::{FnSink, SinkError};
use ripple::Error;

use crate::fixtures::{node, orchestrator, run_collecting, Script, ScriptedBackend};

/// Test: Completion order
/// Given A (50ms) spawning C (30ms) and an independent B (70ms)
/// When the run executes
/// Then events arrive as A, B, C followed by complete
#[tokio::test(start_paused = true)]
async fn test_events_follow_completion_order() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("a", Script::reply(50, r#"{"step": "a"}"#))
            .on("b", Script::reply(70, r#"{"step": "b"}"#))
            .on("c", Script::reply(30, r#"{"step": "c"}"#)),
    );
    let a = node("a").with_spawn(|_| vec![node("c")]);
    let report = run_collecting(
        &orchestrator(&backend),
        vec![a, node("b")],
        RunOptions::new(),
    )
    .await;

    assert_eq!(report.task_order(), vec!["a", "b", "c"]);
    assert_eq!(report.events.len(), 4, "three partial events plus complete");
    assert_eq!(report.terminal().map(|e| e.kind()), Some(EventKind::Complete));
    assert_eq!(backend.finished(), vec!["a", "b", "c"]);

    let aggregate = report.aggregate();
    assert_eq!(aggregate.get("c"), Some(&json!({"step": "c"})));
}

/// Test: Spawned children are counted
/// Given a parent spawning two children from its result
/// When the run executes
/// Then each child produces its own event before the run completes
#[tokio::test(start_paused = true)]
async fn test_spawn_adds_one_event_per_child() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("parent", Script::reply(10, r#"{"topics": ["x", "y"]}"#))
            .on("x", Script::reply(10, r#"{"topic": "x"}"#))
            .on("y", Script::reply(20, r#"{"topic": "y"}"#)),
    );
    let parent = node("parent").with_spawn(|result| {
        result["topics"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|t| t.as_str())
            .map(node)
            .collect()
    });

    let report = run_collecting(&orchestrator(&backend), vec![parent], RunOptions::new()).await;

    assert_eq!(report.task_order(), vec!["parent", "x", "y"]);
    match report.terminal() {
        Some(ProgressEvent::Complete { results, .. }) => {
            assert_eq!(results.len(), 3);
            assert_eq!(results["y"], json!({"topic": "y"}));
        }
        other => panic!("Expected complete event, got {:?}", other),
    }
}

/// Test: Failure isolation
/// Given three tasks where B's backend always errors
/// When the run executes
/// Then B is reported once as a non-fatal error and A, C still complete
#[tokio::test(start_paused = true)]
async fn test_failing_task_does_not_abort_siblings() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("a", Script::reply(10, r#"{"ok": true}"#))
            .on("b", Script::error(5, BackendError::Transport("connection reset".into())))
            .on("c", Script::reply(30, r#"{"ok": true}"#)),
    );
    let report = run_collecting(
        &orchestrator(&backend),
        vec![node("a"), node("b"), node("c")],
        RunOptions::new(),
    )
    .await;

    let errors: Vec<_> = report
        .events
        .iter()
        .filter(|e| e.kind() == EventKind::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    match errors[0] {
        ProgressEvent::Error {
            task,
            message,
            fatal,
            ..
        } => {
            assert_eq!(task.as_deref(), Some("b"));
            assert!(!fatal);
            assert!(message.contains("connection reset"), "message: {}", message);
        }
        other => panic!("Expected error event, got {:?}", other),
    }
    assert_eq!(backend.calls("b"), 3, "backend errors are retried");

    let aggregate = report.aggregate();
    assert_eq!(aggregate.len(), 2);
    assert!(aggregate.get("b").is_none());
    assert_eq!(aggregate.failed, vec!["b".to_string()]);
}

/// Test: Always-invalid output
/// Given a validator that rejects everything and an empty fallback
/// When the task runs with the default budget
/// Then the backend is called 3 times and the degraded result is {}
#[tokio::test(start_paused = true)]
async fn test_always_invalid_output_uses_fallback() {
    let backend = Arc::new(ScriptedBackend::new().on("score", Script::reply(5, r#"{"score": 1}"#)));
    let task = node("score")
        .with_validator(Validator::custom("never", |_| false))
        .with_fallback(json!({}));

    let report = run_collecting(&orchestrator(&backend), vec![task], RunOptions::new()).await;

    assert_eq!(backend.calls("score"), 3);
    assert_eq!(
        report.events[0],
        ProgressEvent::Partial {
            task: "score".to_string(),
            data: json!({}),
            degraded: true,
        }
    );
    assert_eq!(report.aggregate().degraded, vec!["score".to_string()]);
}

/// Test: Recovery on retry
/// Given a task whose first reply is truncated and second is complete
/// When the validator requires every field
/// Then the second attempt is accepted without degradation
#[tokio::test(start_paused = true)]
async fn test_retry_recovers_after_invalid_attempt() {
    let backend = Arc::new(ScriptedBackend::new().on(
        "ats",
        Script::sequence(5, &[r#"{"ats_score": 70,"#, r#"{"ats_score": 82, "issues": []}"#]),
    ));
    let task = node("ats")
        .with_validator(Validator::requires_fields(&["ats_score", "issues"]))
        .with_fallback(json!({"ats_score": 0, "issues": []}));

    let report = run_collecting(&orchestrator(&backend), vec![task], RunOptions::new()).await;

    assert_eq!(backend.calls("ats"), 2);
    let aggregate = report.aggregate();
    assert_eq!(aggregate.get("ats"), Some(&json!({"ats_score": 82, "issues": []})));
    assert!(aggregate.degraded.is_empty());
}

/// Test: Duplicate task names
/// Given two seeds sharing a name
/// When both succeed
/// Then both results are kept under distinct keys and each event names its key
#[tokio::test(start_paused = true)]
async fn test_duplicate_names_keep_both_results() {
    let backend =
        Arc::new(ScriptedBackend::new().on("question", Script::reply(5, r#"{"n": 1}"#)));
    let report = run_collecting(
        &orchestrator(&backend),
        vec![node("question"), node("question")],
        RunOptions::new(),
    )
    .await;

    assert_eq!(report.task_order(), vec!["question", "question#2"]);
    let aggregate = report.aggregate();
    assert_eq!(aggregate.len(), 2);
    assert!(aggregate.get("question").is_some());
    assert!(aggregate.get("question#2").is_some());
}

/// Test: Shared cache across runs
/// Given two runs of the same cached task
/// When the second run starts before the TTL expires
/// Then the backend is only called once
#[tokio::test(start_paused = true)]
async fn test_cache_hit_skips_backend() {
    let backend = Arc::new(ScriptedBackend::new().on("summary", Script::reply(5, r#"{"s": 1}"#)));
    let cache = ResultCache::default();
    let orchestrator = orchestrator(&backend);

    for _ in 0..2 {
        let task = node("summary").with_cache(cache.clone(), "summary");
        let report = run_collecting(&orchestrator, vec![task], RunOptions::new()).await;
        assert_eq!(report.aggregate().get("summary"), Some(&json!({"s": 1})));
    }
    assert_eq!(backend.calls("summary"), 1);
}

/// Test: Sink receives the aggregate
/// Given a sink that counts calls
/// When the run completes
/// Then the sink is called once with the correlation id
#[tokio::test(start_paused = true)]
async fn test_sink_receives_aggregate_once() {
    let backend = Arc::new(ScriptedBackend::new().on("a", Script::reply(5, r#"{"v": 1}"#)));
    let persisted = Arc::new(AtomicUsize::new(0));
    let counter = persisted.clone();
    let sink = FnSink::new(move |aggregate: &ripple::core::Aggregate| {
        assert_eq!(aggregate.correlation_id.as_deref(), Some("req-7"));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let orchestrator = orchestrator(&backend).with_sink(Arc::new(sink));

    let report = run_collecting(
        &orchestrator,
        vec![node("a")],
        RunOptions::new().with_correlation_id("req-7"),
    )
    .await;

    assert_eq!(persisted.load(Ordering::SeqCst), 1);
    match report.terminal() {
        Some(ProgressEvent::Complete { correlation_id, .. }) => {
            assert_eq!(correlation_id.as_deref(), Some("req-7"));
        }
        other => panic!("Expected complete event, got {:?}", other),
    }
}

/// Test: Sink failure
/// Given a sink that rejects the aggregate
/// When the run finishes its tasks
/// Then a fatal error event carries the partial results and the run errors
#[tokio::test(start_paused = true)]
async fn test_sink_failure_emits_fatal_error() {
    let backend = Arc::new(ScriptedBackend::new().on("a", Script::reply(5, r#"{"v": 1}"#)));
    let sink = FnSink::new(|_: &ripple::core::Aggregate| {
        Err(SinkError::Rejected("disk full".to_string()))
    });
    let orchestrator = orchestrator(&backend).with_sink(Arc::new(sink));

    let report = run_collecting(&orchestrator, vec![node("a")], RunOptions::new()).await;

    assert!(matches!(report.result, Err(Error::Sink(_))));
    assert_eq!(report.events.len(), 2);
    match report.terminal() {
        Some(ProgressEvent::Error {
            task,
            fatal,
            partial,
            message,
        }) => {
            assert!(task.is_none());
            assert!(fatal);
            assert!(message.contains("disk full"));
            let partial = partial.as_ref().expect("fatal error carries partial results");
            assert_eq!(partial["a"], json!({"v": 1}));
        }
        other => panic!("Expected fatal error event, got {:?}", other),
    }
    assert!(!report
        .events
        .iter()
        .any(|e| e.kind() == EventKind::Complete));
}

/// Test: Empty run
/// Given no seed tasks
/// When the run starts
/// Then only the complete event is emitted
#[tokio::test(start_paused = true)]
async fn test_empty_run_completes() {
    let backend = Arc::new(ScriptedBackend::new());
    let seeds: Vec<TaskNode> = Vec::new();
    let report = run_collecting(&orchestrator(&backend), seeds, RunOptions::new()).await;

    assert_eq!(report.events.len(), 1);
    assert!(report.aggregate().is_empty());
    assert_eq!(backend.total_calls(), 0);
}
