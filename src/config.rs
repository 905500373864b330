//! Configuration - worker pool sizing and the JSON log directory
//!
//! Layers, later wins:
//! 1. built-in defaults
//! 2. `~/.taskpipe.yml` (top-level keys, then `apps.<name>`)
//! 3. `TASKPIPE_THREADS` / `TASKPIPE_QUEUE_CAPACITY` / `TASKPIPE_DATA_PATH`
//! 4. whatever the caller sets on the returned [`Config`]
//!
//! [`Config::merge_from`] stops before validation so callers can apply the
//! last layer first; [`Config::load_from`] validates.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Queue slots per worker when no capacity is configured
pub const QUEUE_SLOTS_PER_THREAD: usize = 10;

/// Thread count used when the CPU count cannot be determined
const FALLBACK_THREADS: usize = 10;

const ENV_THREADS: &str = "TASKPIPE_THREADS";
const ENV_QUEUE_CAPACITY: &str = "TASKPIPE_QUEUE_CAPACITY";
const ENV_DATA_PATH: &str = "TASKPIPE_DATA_PATH";

/// Task manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker threads. Defaults to twice the available parallelism; I/O
    /// heavy tasks are usually fine with 5 to 40.
    pub threads: usize,
    /// Maximum queued items before producers block.
    /// `None` means `threads * QUEUE_SLOTS_PER_THREAD`.
    pub queue_capacity: Option<usize>,
    /// Directory for `<app>.jsonlog` record files. Unset means no file log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(FALLBACK_THREADS);

        Self {
            threads,
            queue_capacity: None,
            data_path: None,
        }
    }
}

/// Partial config as found in one layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct ConfigLayer {
    threads: Option<usize>,
    queue_capacity: Option<usize>,
    data_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    defaults: ConfigLayer,
    #[serde(default)]
    apps: HashMap<String, ConfigLayer>,
}

impl Config {
    /// Effective queue capacity
    pub fn capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(self.threads * QUEUE_SLOTS_PER_THREAD)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        if self.capacity() == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Per-user config file location
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskpipe.yml")
    }

    /// Load the configuration for application `app` from the default file
    /// and the process environment
    pub fn load(app: &str) -> Result<Self, ConfigError> {
        Self::load_from(app, &Self::default_path(), |key| std::env::var(key).ok())
    }

    /// Load from an explicit file, reading env vars through `env`.
    /// A missing file is treated as empty.
    pub fn load_from<F>(app: &str, path: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::merge_from(app, path, env)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load_from`] without the final [`Config::validate`]
    pub fn merge_from<F>(app: &str, path: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if path.exists() {
            let file = read_file(path)?;
            config.apply(&file.defaults);
            if let Some(layer) = file.apps.get(app) {
                config.apply(layer);
            }
        } else {
            log::debug!("No config file at {}", path.display());
        }

        config.apply(&env_layer(env)?);
        Ok(config)
    }

    fn apply(&mut self, layer: &ConfigLayer) {
        if let Some(threads) = layer.threads {
            self.threads = threads;
        }
        if let Some(capacity) = layer.queue_capacity {
            self.queue_capacity = Some(capacity);
        }
        if let Some(path) = &layer.data_path {
            self.data_path = Some(path.clone());
        }
    }
}

fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // an empty file deserializes as null
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn env_layer<F>(env: F) -> Result<ConfigLayer, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let parse = |var: &str| -> Result<Option<usize>, ConfigError> {
        match env(var) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidEnv {
                    var: var.to_string(),
                    value,
                }),
        }
    };

    Ok(ConfigLayer {
        threads: parse(ENV_THREADS)?,
        queue_capacity: parse(ENV_QUEUE_CAPACITY)?,
        data_path: env(ENV_DATA_PATH)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from),
    })
}
