//! Cancellation integration tests.
//!
//! These tests verify that a run stops early when its token fires or its
//! event receiver goes away, and that no terminal event or sink call
//! follows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ripple::core::{Aggregate, EventKind};
use ripple::orchestration::RunOptions;
use ripple::sink::{FnSink, SinkError};
use ripple::Error;

use crate::fixtures::{node, orchestrator, Script, ScriptedBackend};

fn counting_sink(
    counter: Arc<AtomicUsize>,
) -> FnSink<impl Fn(&Aggregate) -> Result<(), SinkError> + Send + Sync> {
    FnSink::new(move |_: &Aggregate| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

/// Test: Cancel mid-run
/// Given a fast task and a slow task
/// When the token is cancelled after the first event
/// Then the run returns Cancelled with no terminal event and no sink call
#[tokio::test(start_paused = true)]
async fn test_cancel_after_first_event() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("fast", Script::reply(10, r#"{"v": 1}"#))
            .on("slow", Script::reply(10_000, r#"{"v": 2}"#)),
    );
    let persisted = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(&backend).with_sink(Arc::new(counting_sink(persisted.clone())));
    let cancel = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::channel(8);

    let stopper = cancel.clone();
    let (result, events) = tokio::join!(
        orchestrator.run(
            vec![node("fast"), node("slow")],
            RunOptions::new().with_cancel(cancel),
            event_tx,
        ),
        async move {
            let mut events = Vec::new();
            while let Some(event) = event_rx.recv().await {
                events.push(event);
                stopper.cancel();
            }
            events
        }
    );

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].task_name(), Some("fast"));
    assert!(!events.iter().any(|e| e.is_terminal()));
    assert_eq!(persisted.load(Ordering::SeqCst), 0);
    assert!(backend.finished().iter().all(|p| p != "slow"));
}

/// Test: Receiver dropped
/// Given a consumer that disconnects after one event
/// When more tasks are still running
/// Then the run stops without calling the sink
#[tokio::test(start_paused = true)]
async fn test_dropped_receiver_stops_run() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("first", Script::reply(5, r#"{"v": 1}"#))
            .on("second", Script::reply(500, r#"{"v": 2}"#)),
    );
    let persisted = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(&backend).with_sink(Arc::new(counting_sink(persisted.clone())));
    let (event_tx, mut event_rx) = mpsc::channel(8);

    let (result, first) = tokio::join!(
        orchestrator.run(vec![node("first"), node("second")], RunOptions::new(), event_tx),
        async move {
            let first = event_rx.recv().await;
            drop(event_rx);
            first
        }
    );

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(first.map(|e| e.kind()), Some(EventKind::Partial));
    assert_eq!(persisted.load(Ordering::SeqCst), 0);
}

/// Test: Cancelled before start
/// Given a token cancelled before the run begins
/// When the run starts
/// Then no backend call completes and no event is sent
#[tokio::test(start_paused = true)]
async fn test_cancelled_token_before_run() {
    let backend = Arc::new(ScriptedBackend::new().on("a", Script::reply(5, r#"{"v": 1}"#)));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (event_tx, mut event_rx) = mpsc::channel(8);

    let result = orchestrator(&backend)
        .run(vec![node("a")], RunOptions::new().with_cancel(cancel), event_tx)
        .await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(event_rx.recv().await.is_none());
    assert!(backend.finished().is_empty());
}

/// Test: Cancel while the consumer is stalled
/// Given a one-slot channel whose consumer has stopped reading
/// When every task finishes and the token is cancelled later
/// Then the run still returns Cancelled and the sink is never called
#[tokio::test(start_paused = true)]
async fn test_cancel_reaches_run_blocked_on_full_channel() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .on("one", Script::reply(5, r#"{"v": 1}"#))
            .on("two", Script::reply(5, r#"{"v": 2}"#))
            .on("three", Script::reply(5, r#"{"v": 3}"#)),
    );
    let persisted = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(&backend).with_sink(Arc::new(counting_sink(persisted.clone())));
    let cancel = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::channel(1);

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        stopper.cancel();
    });

    let result = orchestrator
        .run(
            vec![node("one"), node("two"), node("three")],
            RunOptions::new().with_cancel(cancel),
            event_tx,
        )
        .await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(backend.finished().len(), 3);
    assert_eq!(event_rx.recv().await.map(|e| e.kind()), Some(EventKind::Partial));
    assert!(event_rx.recv().await.is_none());
    assert_eq!(persisted.load(Ordering::SeqCst), 0);
}
