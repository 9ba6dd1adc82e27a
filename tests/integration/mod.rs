//! Integration test suite for Ripple.
//!
//! These tests drive whole runs through the public API: seed nodes go in,
//! progress events and a merged aggregate come out. They verify that the
//! orchestrator, retry policy, extractor and stream adapter work together.
//!
//! # Test Categories
//!
//! - `orchestrator_runs`: Event ordering, spawning, failure isolation, sinks
//! - `cancellation`: Early termination by token and by dropped receivers
//! - `pipeline_e2e`: TOML pipelines from file to final aggregate
//! - `event_stream`: Encoded frames produced for a live run
//!
//! # CI Compatibility
//!
//! Every test uses a scripted backend under paused tokio time, so no model
//! is invoked and no test waits on the wall clock.

mod fixtures;

mod cancellation;
mod event_stream;
mod orchestrator_runs;
