//! Error types for task execution, the worker pool and configuration

use thiserror::Error;

/// Failure of a single task invocation.
///
/// These never escape a queued invocation: the worker reports them through
/// the manager's [`LogSink`](crate::logging::LogSink) and moves on.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The wrapped callable returned an error
    #[error("task failed: {0:#}")]
    Failed(anyhow::Error),

    /// The wrapped callable panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// A pipe link received a value it cannot iterate over
    #[error("cannot pipe output of task '{task}': expected a list or stream, got {found}")]
    NotIterable { task: String, found: &'static str },

    /// Positional argument missing from the invocation
    #[error("missing positional argument #{0}")]
    MissingArgument(usize),

    /// Argument present but of the wrong shape
    #[error("expected {expected} argument, got {found}")]
    ArgumentType {
        expected: &'static str,
        found: &'static str,
    },

    /// Queueing downstream work failed
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Worker pool failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Not a single worker thread could be started
    #[error("failed to spawn worker threads: {0}")]
    Spawn(#[source] std::io::Error),

    /// `run` was called on a task whose upstream task no longer exists
    #[error("upstream of task '{task}' was dropped, cannot reach the pipeline root")]
    SourceDropped { task: String },
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Yaml {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
