//! Tasks - wrapped callables that can be called directly, queued, or linked
//! into pipelines with `chain` and `pipe`
//!
//! A pipeline is a tree of tasks. Each task owns its downstream links and
//! keeps a weak reference to its upstream source, so `run` on any node can
//! walk back to the root and start there. The root must outlive that walk:
//! keep a handle to it while the pipeline is in use.

use super::context::ExecutionContext;
use super::manager::TaskManager;
use super::value::{Args, Value};
use crate::error::{EngineError, TaskError};
use crate::logging::{emit, report_failure, Fields};
use log::Level;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// Signature of a wrapped callable
pub type TaskFn = dyn Fn(&ExecutionContext, Args) -> anyhow::Result<Value> + Send + Sync;

/// Kind of downstream link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Forward the whole output as one argument
    Chain,
    /// Forward each element of the output as its own invocation
    Pipe,
}

/// Downstream edge of a pipeline
#[derive(Debug, Clone)]
pub enum Link {
    Chain(Task),
    Pipe(Task),
}

impl Link {
    pub fn kind(&self) -> LinkKind {
        match self {
            Self::Chain(_) => LinkKind::Chain,
            Self::Pipe(_) => LinkKind::Pipe,
        }
    }

    pub fn target(&self) -> &Task {
        match self {
            Self::Chain(task) | Self::Pipe(task) => task,
        }
    }
}

struct TaskInner {
    name: String,
    id: Option<String>,
    func: Box<TaskFn>,
    manager: Arc<TaskManager>,
    links: RwLock<Vec<Link>>,
    source: Mutex<Option<Weak<TaskInner>>>,
}

/// Cheaply cloneable handle to a task; clones refer to the same task
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Wrap `func` as a task submitting into `manager`
    pub fn new<F>(manager: &Arc<TaskManager>, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ExecutionContext, Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::build(manager, name.into(), None, Box::new(func))
    }

    /// Like [`Task::new`], but every invocation runs under the given id
    /// instead of a fresh one (replaying or resuming a known task)
    pub fn with_id<F>(
        manager: &Arc<TaskManager>,
        name: impl Into<String>,
        id: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(&ExecutionContext, Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::build(manager, name.into(), Some(id.into()), Box::new(func))
    }

    fn build(manager: &Arc<TaskManager>, name: String, id: Option<String>, func: Box<TaskFn>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                name,
                id,
                func,
                manager: manager.clone(),
                links: RwLock::new(Vec::new()),
                source: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id(&self) -> Option<&str> {
        self.inner.id.as_deref()
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.inner.manager
    }

    /// Call the task synchronously on the current thread.
    ///
    /// Downstream links are notified on success. Failures are reported to
    /// the manager's log sink and yield `None`.
    pub fn call(&self, args: impl Into<Args>) -> Option<Value> {
        self.execute(args.into()).ok()
    }

    /// Schedule an invocation; blocks only while the queue is full
    pub fn queue(&self, args: impl Into<Args>) -> Result<&Self, EngineError> {
        self.inner.manager.submit(self.clone(), args.into())?;
        Ok(self)
    }

    /// Block until the shared queue has drained
    pub fn wait(&self) -> &Self {
        self.inner.manager.wait();
        self
    }

    /// Seed the pipeline's root with `args` and wait for everything it
    /// sets off to finish. Works from any node of the pipeline.
    ///
    /// Fails with [`EngineError::SourceDropped`] if an upstream task was
    /// dropped, since the real root can no longer be reached.
    pub fn run(&self, args: impl Into<Args>) -> Result<&Self, EngineError> {
        let root = self.find_root().map_err(|orphan| EngineError::SourceDropped {
            task: orphan.inner.name.clone(),
        })?;
        root.queue(args)?;
        root.wait();
        Ok(self)
    }

    /// Queue `other` with this task's output after each successful
    /// invocation. Returns `other` so pipelines read left to right.
    ///
    /// Links hold their targets strongly. Linking back into an upstream
    /// task (`a.chain(&b); b.chain(&a)`) forms a cycle that is never freed.
    pub fn chain(&self, other: &Task) -> Task {
        self.link(Link::Chain(other.clone()))
    }

    /// Queue `other` once per element of this task's output, which must be
    /// a list or a stream. Returns `other`.
    ///
    /// A stream output is shared, not copied: with several pipe links the
    /// first one drains it and the rest see nothing. As with
    /// [`Task::chain`], a link back upstream leaks both tasks.
    pub fn pipe(&self, other: &Task) -> Task {
        self.link(Link::Pipe(other.clone()))
    }

    pub fn links(&self) -> Vec<Link> {
        self.inner.links.read().clone()
    }

    /// Upstream task, if it is linked and still alive
    pub fn source(&self) -> Option<Task> {
        self.inner
            .source
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Task { inner })
    }

    /// First task of the pipeline this task belongs to.
    ///
    /// If an upstream task has been dropped, this is the last task still
    /// reachable, and a warning is logged.
    pub fn root(&self) -> Task {
        self.find_root().unwrap_or_else(|orphan| orphan)
    }

    /// Walk upstream. `Err` carries the task whose source is gone.
    fn find_root(&self) -> Result<Task, Task> {
        let mut current = self.clone();
        let mut seen = vec![Arc::as_ptr(&current.inner)];

        loop {
            let slot = current.inner.source.lock().clone();
            let source = match slot {
                None => return Ok(current),
                Some(weak) => match weak.upgrade() {
                    Some(inner) => Task { inner },
                    None => {
                        current.warn(&format!(
                            "Upstream of task '{}' was dropped, pipeline root is unreachable",
                            current.inner.name
                        ));
                        return Err(current);
                    }
                },
            };

            let ptr = Arc::as_ptr(&source.inner);
            if seen.contains(&ptr) {
                current.warn(&format!(
                    "Upstream cycle through task '{}', starting pipeline at '{}'",
                    source.inner.name, current.inner.name
                ));
                return Ok(current);
            }
            seen.push(ptr);
            current = source;
        }
    }

    pub(crate) fn execute(&self, args: Args) -> Result<Value, TaskError> {
        let ctx = ExecutionContext::new(
            &self.inner.name,
            self.inner.id.as_deref(),
            self.inner.manager.fields(),
            self.inner.manager.sink(),
        );

        let mut fields = Fields::new();
        fields.insert("task_args".into(), args.positional_json());
        fields.insert("task_kwargs".into(), args.keyword_json());
        ctx.log_with(Level::Debug, "Begin task", fields);

        let outcome = self.invoke(&ctx, args);
        if let Err(err) = &outcome {
            report_failure(&ctx, err);
        }
        outcome
    }

    fn invoke(&self, ctx: &ExecutionContext, args: Args) -> Result<Value, TaskError> {
        let value = panic::catch_unwind(AssertUnwindSafe(|| (self.inner.func)(ctx, args)))
            .map_err(panic_message)?
            .map_err(TaskError::Failed)?;

        // stream outputs run user code while being drained
        panic::catch_unwind(AssertUnwindSafe(|| self.notify(&value))).map_err(panic_message)??;
        Ok(value)
    }

    fn notify(&self, value: &Value) -> Result<(), TaskError> {
        let links = self.links();
        if links.iter().any(|l| l.kind() == LinkKind::Pipe) && !value.is_iterable() {
            return Err(TaskError::NotIterable {
                task: self.inner.name.clone(),
                found: value.kind(),
            });
        }

        for link in &links {
            match link {
                Link::Chain(target) => {
                    target.queue(Args::one(value.clone()))?;
                }
                Link::Pipe(target) => {
                    if let Some(items) = value.items() {
                        for item in items {
                            target.queue(Args::one(item))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn link(&self, link: Link) -> Task {
        let target = link.target().clone();
        target.set_source(self);
        self.inner.links.write().push(link);
        target
    }

    fn set_source(&self, source: &Task) {
        let previous = self
            .inner
            .source
            .lock()
            .replace(Arc::downgrade(&source.inner))
            .and_then(|weak| weak.upgrade());

        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &source.inner) {
                self.warn(&format!(
                    "Task '{}' already follows '{}', re-linking it after '{}'",
                    self.inner.name, previous.name, source.inner.name
                ));
            }
        }
    }

    /// Warning about pipeline structure, sent to the manager's sink
    fn warn(&self, message: &str) {
        let mut fields = (*self.inner.manager.fields()).clone();
        fields.insert("task_name".into(), self.inner.name.clone().into());
        emit(self.inner.manager.sink().as_ref(), Level::Warn, message, &fields);
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<String> = self
            .links()
            .iter()
            .map(|l| l.target().name().to_string())
            .collect();
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("links", &targets)
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> TaskError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    TaskError::Panicked(message)
}
