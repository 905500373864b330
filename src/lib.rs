//! taskpipe - threaded task pipelines
//!
//! Wrap plain functions as tasks, link them with `chain` and `pipe`, and
//! drain them through a bounded queue served by a fixed pool of worker
//! threads.
//!
//! ```no_run
//! use taskpipe::{App, Args, Config, Value};
//!
//! let app = App::new("numbers", Config::default())?;
//! let source = app.task("source", |_, _| Ok(Value::stream(0..10i64)));
//! let bump = app.task("bump", |_, args| Ok(Value::from(args.require(0)?.try_f64()? + 0.1)));
//! let print = app.task("print", |ctx, args| {
//!     ctx.info(&format!("got {}", args.require(0)?));
//!     Ok(Value::unit())
//! });
//!
//! source.pipe(&bump).chain(&print).run(Args::new())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod app;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;

// Re-exports
pub use app::App;
pub use config::Config;
pub use crate::core::{Args, ExecutionContext, Link, LinkKind, ManagerStats, Task, TaskManager, Value};
pub use error::{ConfigError, EngineError, TaskError};
pub use logging::{Fields, JsonFileSink, LogRecord, LogSink, RecordingSink, StdLogSink};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
