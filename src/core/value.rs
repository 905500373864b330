//! Values passed between tasks, and the argument bundle of a work item

use crate::error::TaskError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Lazy, single-pass sequence shared between every clone of the handle.
///
/// Cloning does not copy the remaining elements: all clones pull from the
/// same iterator, so the first consumer to drain it leaves nothing for the
/// others.
#[derive(Clone)]
pub struct LazySeq {
    inner: Arc<Mutex<Box<dyn Iterator<Item = Value> + Send>>>,
}

impl LazySeq {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Value> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(iter))),
        }
    }
}

impl Iterator for LazySeq {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.inner.lock().next()
    }
}

impl fmt::Debug for LazySeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LazySeq(..)")
    }
}

/// A task's input or output
#[derive(Debug, Clone)]
pub enum Value {
    /// Plain structured data
    Data(serde_json::Value),
    /// Lazily produced sequence of values
    Stream(LazySeq),
}

impl Value {
    /// The empty value returned by tasks that only have side effects
    pub fn unit() -> Self {
        Self::Data(serde_json::Value::Null)
    }

    /// Build a list value
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<serde_json::Value>,
    {
        Self::Data(serde_json::Value::Array(
            items.into_iter().map(Into::into).collect(),
        ))
    }

    /// Wrap an iterator as a lazy stream. Elements are produced only while
    /// a downstream pipe link pulls them.
    pub fn stream<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: Into<Value> + 'static,
    {
        Self::Stream(LazySeq::new(items.into_iter().map(Into::into)))
    }

    /// Short name of the value's shape, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stream(_) => "stream",
            Self::Data(json) => match json {
                serde_json::Value::Null => "null",
                serde_json::Value::Bool(_) => "bool",
                serde_json::Value::Number(_) => "number",
                serde_json::Value::String(_) => "string",
                serde_json::Value::Array(_) => "list",
                serde_json::Value::Object(_) => "object",
            },
        }
    }

    /// Whether a pipe link can fan this value out
    pub fn is_iterable(&self) -> bool {
        matches!(self, Self::Stream(_) | Self::Data(serde_json::Value::Array(_)))
    }

    /// Iterate the elements of a list or stream.
    ///
    /// Iterating a stream consumes it for every holder of the handle.
    pub fn items(&self) -> Option<Box<dyn Iterator<Item = Value> + Send>> {
        match self {
            Self::Stream(seq) => Some(Box::new(seq.clone())),
            Self::Data(serde_json::Value::Array(items)) => {
                Some(Box::new(items.clone().into_iter().map(Value::Data)))
            }
            Self::Data(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data(json) => Some(json),
            Self::Stream(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(serde_json::Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(serde_json::Value::as_f64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(serde_json::Value::as_str)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    pub fn try_i64(&self) -> Result<i64, TaskError> {
        self.as_i64().ok_or(TaskError::ArgumentType {
            expected: "integer",
            found: self.kind(),
        })
    }

    pub fn try_f64(&self) -> Result<f64, TaskError> {
        self.as_f64().ok_or(TaskError::ArgumentType {
            expected: "number",
            found: self.kind(),
        })
    }

    /// Render for structured log fields. Streams are never consumed here.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Data(json) => json.clone(),
            Self::Stream(_) => serde_json::Value::String("<stream>".to_string()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::unit()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(json) => write!(f, "{}", json),
            Self::Stream(_) => write!(f, "<stream>"),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::Data(json)
    }
}

macro_rules! impl_from_json {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::Data(serde_json::Value::from(v))
                }
            }
        )*
    };
}

impl_from_json!(i32, i64, u32, u64, f64, bool, String, &str);

/// Positional and keyword arguments of one invocation
#[derive(Debug, Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single positional argument, the shape every chain/pipe link uses
    pub fn one(value: impl Into<Value>) -> Self {
        Self {
            positional: vec![value.into()],
            keyword: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    /// Positional argument that the callable cannot do without
    pub fn require(&self, index: usize) -> Result<&Value, TaskError> {
        self.positional
            .get(index)
            .ok_or(TaskError::MissingArgument(index))
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Consume the bundle, returning the first positional argument
    pub fn into_first(self) -> Option<Value> {
        self.positional.into_iter().next()
    }

    pub(crate) fn positional_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.positional.iter().map(Value::to_json).collect())
    }

    pub(crate) fn keyword_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.keyword
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl From<()> for Args {
    fn from(_: ()) -> Self {
        Self::new()
    }
}

impl From<Value> for Args {
    fn from(value: Value) -> Self {
        Self::one(value)
    }
}

impl From<Vec<Value>> for Args {
    fn from(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: BTreeMap::new(),
        }
    }
}
