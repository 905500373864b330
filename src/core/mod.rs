//! Core engine - tasks, pipeline links and the shared worker pool

mod context;
mod manager;
mod queue;
mod task;
mod value;

pub use context::ExecutionContext;
pub use manager::{ManagerStats, TaskManager};
pub use task::{Link, LinkKind, Task, TaskFn};
pub use value::{Args, LazySeq, Value};
