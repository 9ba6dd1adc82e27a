//! Event stream adapter.
//!
//! Turns the orchestrator's event channel into self-delimited text frames,
//! one per event, in the order the events were sent.

use crate::core::event::ProgressEvent;
use futures::Stream;
use serde_json::json;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Wire framing for progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Server-sent events: `data: {json}\n\n`.
    #[default]
    Sse,
    /// Newline-delimited JSON: `{json}\n`.
    NdJson,
}

impl Encoding {
    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Sse => "text/event-stream",
            Encoding::NdJson => "application/x-ndjson",
        }
    }
}

/// Serialize one event as a complete frame.
pub fn encode(event: &ProgressEvent, encoding: Encoding) -> String {
    let body = serde_json::to_string(event).unwrap_or_else(|err| {
        json!({
            "type": "error",
            "task": event.task_name(),
            "message": format!("event serialization failed: {}", err),
            "fatal": event.is_terminal(),
        })
        .to_string()
    });
    match encoding {
        Encoding::Sse => format!("data: {}\n\n", body),
        Encoding::NdJson => format!("{}\n", body),
    }
}

/// Parse one frame produced by [`encode`]. SSE lines other than `data:`
/// are ignored.
pub fn decode(frame: &str) -> Option<ProgressEvent> {
    let body = frame
        .lines()
        .map(str::trim)
        .find_map(|line| match line.strip_prefix("data:") {
            Some(data) => Some(data.trim()),
            None if line.starts_with('{') => Some(line),
            None => None,
        })?;
    serde_json::from_str(body).ok()
}

/// A `Stream` of encoded frames that ends after the terminal event.
pub struct EventStream {
    rx: mpsc::Receiver<ProgressEvent>,
    encoding: Encoding,
    finished: bool,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<ProgressEvent>, encoding: Encoding) -> Self {
        Self {
            rx,
            encoding,
            finished: false,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl Stream for EventStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                    self.rx.close();
                }
                Poll::Ready(Some(encode(&event, self.encoding)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
