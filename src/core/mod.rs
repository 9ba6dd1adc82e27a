//! Core domain models: task nodes, validators and progress events.

pub mod event;
pub mod task;
pub mod validate;

pub use event::{Aggregate, EventKind, ProgressEvent};
pub use task::{SpawnRule, TaskId, TaskNode, TaskState};
pub use validate::Validator;
