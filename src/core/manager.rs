//! Task Manager - bounded work queue drained by a lazily started thread pool
//!
//! The pool is spawned on the first submission, exactly once, and lives for
//! the rest of the process. Worker threads are never joined: process exit
//! ends them.

use super::queue::WorkQueue;
use super::task::Task;
use super::value::Args;
use crate::config::Config;
use crate::error::{ConfigError, EngineError};
use crate::logging::{Fields, LogSink, StdLogSink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

/// One queued invocation
pub(crate) struct WorkItem {
    pub task: Task,
    pub args: Args,
}

/// Counters over queued invocations (direct calls are not counted)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Owns the shared queue and worker pool every task submits into
pub struct TaskManager {
    threads: usize,
    capacity: usize,
    queue: OnceLock<Arc<WorkQueue<WorkItem>>>,
    spawn_lock: Mutex<()>,
    counters: Arc<Counters>,
    sink: Arc<dyn LogSink>,
    fields: Arc<Fields>,
}

impl TaskManager {
    /// Create a manager. No threads are started until the first submission.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            threads: config.threads,
            capacity: config.capacity(),
            queue: OnceLock::new(),
            spawn_lock: Mutex::new(()),
            counters: Arc::new(Counters::default()),
            sink: Arc::new(StdLogSink),
            fields: Arc::new(Fields::new()),
        })
    }

    /// Replace the log sink (and with it the failure policy)
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Fields added to every record logged by tasks of this manager
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = Arc::new(fields);
        self
    }

    /// Queue `task` with `args`, starting the pool first if needed.
    ///
    /// Blocks while the queue is full.
    pub fn submit(&self, task: Task, args: Args) -> Result<(), EngineError> {
        let queue = self.ensure_started()?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        queue.push(WorkItem { task, args });
        Ok(())
    }

    /// Block until every submitted item, including items submitted by
    /// workers while draining, has finished. Returns immediately if
    /// nothing was ever submitted.
    ///
    /// Calling this from inside a task deadlocks: the calling worker's own
    /// item never finishes.
    pub fn wait(&self) {
        if let Some(queue) = self.queue.get() {
            queue.join();
        }
    }

    pub fn is_started(&self) -> bool {
        self.queue.get().is_some()
    }

    pub fn thread_count(&self) -> usize {
        self.threads
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items queued but not yet picked up by a worker
    pub fn pending(&self) -> usize {
        self.queue.get().map_or(0, |q| q.len())
    }

    /// Items queued or in flight
    pub fn unfinished(&self) -> usize {
        self.queue.get().map_or(0, |q| q.unfinished())
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn sink(&self) -> Arc<dyn LogSink> {
        self.sink.clone()
    }

    pub(crate) fn fields(&self) -> Arc<Fields> {
        self.fields.clone()
    }

    fn ensure_started(&self) -> Result<&Arc<WorkQueue<WorkItem>>, EngineError> {
        if let Some(queue) = self.queue.get() {
            return Ok(queue);
        }

        let _guard = self.spawn_lock.lock();
        if let Some(queue) = self.queue.get() {
            return Ok(queue);
        }

        let queue = self.spawn()?;
        Ok(self.queue.get_or_init(|| queue))
    }

    fn spawn(&self) -> Result<Arc<WorkQueue<WorkItem>>, EngineError> {
        let queue = Arc::new(WorkQueue::new(self.capacity));
        let mut started = 0;
        let mut last_error = None;

        for n in 0..self.threads {
            let worker_queue = queue.clone();
            let counters = self.counters.clone();
            let spawned = thread::Builder::new()
                .name(format!("taskpipe-worker-{}", n))
                .spawn(move || consume(worker_queue, counters));

            match spawned {
                Ok(_) => started += 1,
                Err(e) => {
                    log::warn!("Failed to spawn worker {}: {}", n, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if started == 0 => Err(EngineError::Spawn(e)),
            Some(_) => {
                log::warn!("Worker pool running with {} of {} threads", started, self.threads);
                Ok(queue)
            }
            None => {
                log::debug!(
                    "Started {} workers (queue capacity {})",
                    started,
                    self.capacity
                );
                Ok(queue)
            }
        }
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("threads", &self.threads)
            .field("capacity", &self.capacity)
            .field("started", &self.is_started())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Marks the current item done when dropped, so completion is signalled
/// even if the invocation unwinds.
struct Completion<'a>(&'a WorkQueue<WorkItem>);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.0.task_done();
    }
}

fn consume(queue: Arc<WorkQueue<WorkItem>>, counters: Arc<Counters>) {
    loop {
        let WorkItem { task, args } = queue.pop();
        let _done = Completion(queue.as_ref());

        // Task::execute catches and reports callable failures itself; a
        // panic escaping it (e.g. from fan-out) must not end the worker.
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.execute(args)));
        match outcome {
            Ok(Ok(_)) => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(_)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                log::error!("Worker recovered from a panic in task '{}'", task.name());
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
