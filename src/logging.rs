//! Logging collaborator
//!
//! The engine reports through a [`LogSink`]: a level, a message and a map of
//! structured fields carrying the invocation's task name and id. The default
//! sink forwards to the `log` facade; [`RecordingSink`] keeps records in
//! memory for inspection; [`JsonFileSink`] appends them to a JSON lines file.

use crate::core::ExecutionContext;
use crate::error::TaskError;
use chrono::{SecondsFormat, Utc};
use log::Level;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Structured log fields
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Destination for engine and task log records.
///
/// Implementations are called synchronously from worker threads.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str, fields: &Fields);

    /// Called once for every failed invocation, after which the failure is
    /// swallowed. Override to change what "log and continue" means; the
    /// worker keeps running whatever this does.
    fn task_failed(&self, ctx: &ExecutionContext, error: &TaskError) {
        let mut fields = ctx.fields();
        fields.insert("error".into(), error.to_string().into());
        self.log(Level::Error, "Task failed", &fields);
    }
}

/// Forwards records to the `log` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct StdLogSink;

impl LogSink for StdLogSink {
    fn log(&self, level: Level, message: &str, fields: &Fields) {
        if fields.is_empty() {
            log::log!(target: "taskpipe::task", level, "{}", message);
        } else {
            log::log!(
                target: "taskpipe::task",
                level,
                "{} {}",
                message,
                serde_json::Value::Object(fields.clone())
            );
        }
    }
}

/// One captured record
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub fields: Fields,
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records at exactly `level`
    pub fn at_level(&self, level: Level) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    /// Failure reports produced by [`LogSink::task_failed`]
    pub fn failures(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == Level::Error && r.fields.contains_key("error"))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for RecordingSink {
    fn log(&self, level: Level, message: &str, fields: &Fields) {
        self.records.lock().push(LogRecord {
            level,
            message: message.to_string(),
            fields: fields.clone(),
        });
    }
}

/// Appends every record to a file as one JSON object per line, then hands
/// it to an optional second sink (usually [`StdLogSink`] for the console).
///
/// Each object carries the record's fields plus `timestamp`, `level` and
/// `message`.
pub struct JsonFileSink {
    path: PathBuf,
    file: Mutex<File>,
    echo: Option<Arc<dyn LogSink>>,
}

impl JsonFileSink {
    /// Open `path` for appending, creating it and its parent directories
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            echo: None,
        })
    }

    /// Also pass every record on to `sink`
    pub fn echo_to(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.echo = Some(sink);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, level: Level, message: &str, fields: &Fields) -> std::io::Result<()> {
        let mut record = fields.clone();
        record.insert(
            "timestamp".into(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true).into(),
        );
        record.insert("level".into(), level.as_str().into());
        record.insert("message".into(), message.into());

        let line = serde_json::to_string(&serde_json::Value::Object(record))?;
        writeln!(self.file.lock(), "{}", line)
    }
}

impl LogSink for JsonFileSink {
    fn log(&self, level: Level, message: &str, fields: &Fields) {
        if let Err(e) = self.write(level, message, fields) {
            log::warn!("Failed to write log record to {}: {}", self.path.display(), e);
        }
        if let Some(echo) = &self.echo {
            echo.log(level, message, fields);
        }
    }
}

impl std::fmt::Debug for JsonFileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileSink")
            .field("path", &self.path)
            .field("echo", &self.echo.is_some())
            .finish()
    }
}

/// Best-effort log call: a panicking sink must not take the worker down.
pub(crate) fn emit(sink: &dyn LogSink, level: Level, message: &str, fields: &Fields) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| sink.log(level, message, fields)));
}

/// Best-effort failure report, see [`emit`]
pub(crate) fn report_failure(ctx: &ExecutionContext, error: &TaskError) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| ctx.sink().task_failed(ctx, error)));
}

/// Initialise `env_logger` for the binary. `RUST_LOG` wins over `default_filter`.
pub fn init_logger(default_filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}
