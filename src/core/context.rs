//! Per-invocation execution context
//!
//! A fresh context is built for every task invocation and handed to the
//! callable by reference. It is dropped when the invocation ends, whether
//! the callable succeeded, failed or panicked, so nothing leaks between
//! invocations running on different workers.

use crate::logging::{emit, Fields, LogSink};
use chrono::{DateTime, Utc};
use log::Level;
use std::sync::Arc;

/// Identity of one task invocation, plus a correlated logger
pub struct ExecutionContext {
    task_name: String,
    task_id: String,
    started_at: DateTime<Utc>,
    base_fields: Arc<Fields>,
    sink: Arc<dyn LogSink>,
}

impl ExecutionContext {
    pub(crate) fn new(
        task_name: &str,
        explicit_id: Option<&str>,
        base_fields: Arc<Fields>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let task_id = match explicit_id {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        Self {
            task_name: task_name.to_string(),
            task_id,
            started_at: Utc::now(),
            base_fields,
            sink,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Invocation id: the task's explicit id if it has one, else a fresh UUID
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Structured fields identifying this invocation
    pub fn fields(&self) -> Fields {
        let mut fields = (*self.base_fields).clone();
        fields.insert("task_name".into(), self.task_name.clone().into());
        fields.insert("task_id".into(), self.task_id.clone().into());
        fields
    }

    /// Log with the context fields plus `extra`
    pub fn log_with(&self, level: Level, message: &str, extra: Fields) {
        let mut fields = self.fields();
        fields.extend(extra);
        emit(self.sink.as_ref(), level, message, &fields);
    }

    pub fn log(&self, level: Level, message: &str) {
        emit(self.sink.as_ref(), level, message, &self.fields());
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }

    pub(crate) fn sink(&self) -> &dyn LogSink {
        self.sink.as_ref()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task_name", &self.task_name)
            .field("task_id", &self.task_id)
            .field("started_at", &self.started_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::RecordingSink;

    fn context(id: Option<&str>, sink: Arc<RecordingSink>) -> ExecutionContext {
        let mut base = Fields::new();
        base.insert("app_name".into(), "crawler".into());
        ExecutionContext::new("fetch", id, Arc::new(base), sink)
    }

    #[test]
    fn test_fresh_ids_per_invocation() {
        let sink = Arc::new(RecordingSink::new());
        let a = context(None, sink.clone());
        let b = context(None, sink);
        assert_ne!(a.task_id(), b.task_id());
        assert!(uuid::Uuid::parse_str(a.task_id()).is_ok());
    }

    #[test]
    fn test_explicit_id_reused() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = context(Some("resume-42"), sink);
        assert_eq!(ctx.task_id(), "resume-42");
    }

    #[test]
    fn test_log_carries_fields() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = context(Some("id-1"), sink.clone());
        ctx.info("fetched page");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::Info);
        assert_eq!(records[0].message, "fetched page");
        assert_eq!(records[0].fields["task_name"], "fetch");
        assert_eq!(records[0].fields["task_id"], "id-1");
        assert_eq!(records[0].fields["app_name"], "crawler");
    }
}
