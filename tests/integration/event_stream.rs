//! Event stream integration tests.
//!
//! These tests consume a live run through the stream adapter and check the
//! frames a client would see.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use ripple::core::{EventKind, ProgressEvent};
use ripple::orchestration::{BackendError, RunOptions};
use ripple::stream::{decode, Encoding, EventStream};

use crate::fixtures::{node, orchestrator, Script, ScriptedBackend};

async fn frames_for_run(backend: Arc<ScriptedBackend>, encoding: Encoding) -> Vec<String> {
    let orchestrator = orchestrator(&backend);
    let (event_tx, event_rx) = mpsc::channel(8);
    let (_, frames) = tokio::join!(
        orchestrator.run(
            vec![node("basic"), node("ats")],
            RunOptions::new().with_correlation_id("stream-1"),
            event_tx,
        ),
        EventStream::new(event_rx, encoding).collect::<Vec<_>>()
    );
    frames
}

/// Test: SSE frames for a run
/// Given a run with one success and one failure
/// When it is consumed as server-sent events
/// Then every frame is a data line and the last frame is complete
#[tokio::test(start_paused = true)]
async fn test_sse_frames_end_with_complete() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("basic", Script::reply(10, r#"{"name": "Ada"}"#))
            .on("ats", Script::error(20, BackendError::Quota("rate limited".into()))),
    );
    let frames = frames_for_run(backend, Encoding::Sse).await;

    assert_eq!(frames.len(), 3);
    assert!(frames
        .iter()
        .all(|f| f.starts_with("data: ") && f.ends_with("\n\n")));

    let events: Vec<ProgressEvent> = frames.iter().filter_map(|f| decode(f)).collect();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Partial, EventKind::Error, EventKind::Complete]
    );
    match &events[2] {
        ProgressEvent::Complete {
            results,
            correlation_id,
            failed,
            ..
        } => {
            assert_eq!(results["basic"]["name"], "Ada");
            assert_eq!(correlation_id.as_deref(), Some("stream-1"));
            assert_eq!(failed, &vec!["ats".to_string()]);
        }
        other => panic!("Expected complete event, got {:?}", other),
    }
}

/// Test: NDJSON frames for a run
/// Given a run of two successful tasks
/// When it is consumed as newline-delimited JSON
/// Then each frame is one JSON line in completion order
#[tokio::test(start_paused = true)]
async fn test_ndjson_frames_follow_completion_order() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("basic", Script::reply(40, r#"{"name": "Ada"}"#))
            .on("ats", Script::reply(10, r#"{"ats_score": 91}"#)),
    );
    let frames = frames_for_run(backend, Encoding::NdJson).await;

    assert_eq!(frames.len(), 3);
    for frame in &frames {
        assert_eq!(frame.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(frame.trim_end()).unwrap();
        assert!(value["type"].is_string());
    }
    let order: Vec<_> = frames
        .iter()
        .filter_map(|f| decode(f))
        .filter_map(|e| e.task_name().map(str::to_string))
        .collect();
    assert_eq!(order, vec!["ats", "basic"]);
}
