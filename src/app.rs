//! Application object - one named app owning the configuration and task
//! manager that all of its tasks share

use crate::config::Config;
use crate::core::{Args, ExecutionContext, Task, TaskManager, Value};
use crate::error::ConfigError;
use crate::logging::{Fields, JsonFileSink, LogSink, StdLogSink};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Application state
pub struct App {
    pub name: String,
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub config: Config,
    manager: Arc<TaskManager>,
}

impl App {
    /// Create an app logging through the `log` crate
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        Self::with_sink(name, config, Arc::new(StdLogSink))
    }

    /// Create an app logging through `sink`
    pub fn with_sink(
        name: impl Into<String>,
        config: Config,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let id = Uuid::new_v4();
        let started_at = Utc::now();

        let mut fields = Fields::new();
        fields.insert("app_name".into(), name.clone().into());
        fields.insert("app_id".into(), id.to_string().into());
        fields.insert("app_started_at".into(), started_at.to_rfc3339().into());

        let manager = TaskManager::new(&config)?
            .with_sink(sink)
            .with_fields(fields);

        log::debug!(
            "App '{}' configured with {} threads, queue capacity {}",
            name,
            config.threads,
            config.capacity()
        );

        Ok(Self {
            name,
            id,
            started_at,
            config,
            manager: Arc::new(manager),
        })
    }

    /// Create an app configured from `~/.taskpipe.yml` and the environment
    pub fn from_env(name: &str) -> Result<Self> {
        let config = Config::load(name)?;
        Self::configured(name, config)
    }

    /// Create an app whose sink follows `config`: with a `data_path`, every
    /// record is also appended to `<data_path>/<name>.jsonlog`.
    pub fn configured(name: &str, config: Config) -> Result<Self> {
        let sink: Arc<dyn LogSink> = match &config.data_path {
            Some(dir) => {
                let path = dir.join(format!("{}.jsonlog", name));
                let sink = JsonFileSink::open(&path)
                    .with_context(|| format!("failed to open log file {}", path.display()))?;
                Arc::new(sink.echo_to(Arc::new(StdLogSink)))
            }
            None => Arc::new(StdLogSink),
        };
        Ok(Self::with_sink(name, config, sink)?)
    }

    /// Wrap `func` as a task of this app
    pub fn task<F>(&self, name: impl Into<String>, func: F) -> Task
    where
        F: Fn(&ExecutionContext, Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Task::new(&self.manager, name, func)
    }

    /// Wrap `func` as a task whose invocations all run under `id`
    pub fn task_with_id<F>(&self, name: impl Into<String>, id: impl Into<String>, func: F) -> Task
    where
        F: Fn(&ExecutionContext, Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Task::with_id(&self.manager, name, id, func)
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    /// Block until all queued work has finished
    pub fn wait(&self) {
        self.manager.wait();
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}
