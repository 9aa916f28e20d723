//! Dataflow stage contract and composition

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::source::DataSource;

/// Free-form stage configuration; recognized keys are defined per stage
pub type Options = serde_json::Map<String, Value>;

/// Typed lookups into an [`Options`] map
///
/// A missing key is `Ok(None)`; a key holding the wrong kind of value is an
/// [`Error::InvalidOption`].
pub trait OptionsExt {
    /// Non-negative integer option
    fn option_usize(&self, key: &str) -> Result<Option<usize>>;

    /// Unsigned 64-bit option
    fn option_u64(&self, key: &str) -> Result<Option<u64>>;

    /// Boolean option
    fn option_bool(&self, key: &str) -> Result<Option<bool>>;

    /// String option
    fn option_str(&self, key: &str) -> Result<Option<&str>>;
}

fn invalid(key: &str, expected: &str, got: &Value) -> Error {
    Error::InvalidOption {
        key: key.to_string(),
        reason: format!("expected {expected}, got {got}"),
    }
}

impl OptionsExt for Options {
    fn option_usize(&self, key: &str) -> Result<Option<usize>> {
        self.option_u64(key)?
            .map(|v| {
                usize::try_from(v).map_err(|_| Error::InvalidOption {
                    key: key.to_string(),
                    reason: format!("{v} does not fit in usize"),
                })
            })
            .transpose()
    }

    fn option_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(key, "a non-negative integer", v)),
        }
    }

    fn option_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_bool().map(Some).ok_or_else(|| invalid(key, "a boolean", v)),
        }
    }

    fn option_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_str().map(Some).ok_or_else(|| invalid(key, "a string", v)),
        }
    }
}

/// A transformation from one data source into another
///
/// The output may wrap the input's accessors or be materialized anew; either
/// way it is a complete [`DataSource`] and downstream stages cannot tell the
/// difference.
#[async_trait]
pub trait Dataflow<In, Out>: Send + Sync
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Transform `input` into a new data source
    async fn apply(
        &self,
        input: DataSource<In>,
        options: &Options,
        ctx: &ExecutionContext,
    ) -> Result<DataSource<Out>>;
}

/// Boxed same-typed stage
pub type BoxedDataflow<T> = Box<dyn Dataflow<T, T>>;

/// Ordered list of same-typed stages, each with its own options
pub struct DataflowChain<T: Send + 'static> {
    stages: Vec<(BoxedDataflow<T>, Options)>,
}

impl<T: Send + 'static> DataflowChain<T> {
    /// Create an empty chain
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage
    pub fn push(&mut self, stage: BoxedDataflow<T>, options: Options) {
        self.stages.push((stage, options));
    }

    /// Append a stage, builder style
    #[must_use]
    pub fn with(mut self, stage: BoxedDataflow<T>, options: Options) -> Self {
        self.push(stage, options);
        self
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Names of the stages in order
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|(stage, _)| stage.name()).collect()
    }

    /// Run every stage in order; the first failure stops the chain
    pub async fn run(&self, input: DataSource<T>, ctx: &ExecutionContext) -> Result<DataSource<T>> {
        let mut current = input;
        for (index, (stage, options)) in self.stages.iter().enumerate() {
            info!(stage = stage.name(), index, "applying dataflow stage");
            current = stage.apply(current, options, ctx).await?;
        }
        Ok(current)
    }
}

impl<T: Send + 'static> Default for DataflowChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Two stages of different types run back to back, sharing one options map
pub struct Then<A, B, Mid> {
    first: A,
    second: B,
    name: String,
    _marker: PhantomData<fn() -> Mid>,
}

impl<A, B, Mid> Then<A, B, Mid> {
    /// Compose `first` then `second`
    pub fn new<In, Out>(first: A, second: B) -> Self
    where
        In: Send + 'static,
        Mid: Send + 'static,
        Out: Send + 'static,
        A: Dataflow<In, Mid>,
        B: Dataflow<Mid, Out>,
    {
        let name = format!("{} -> {}", first.name(), second.name());
        Self {
            first,
            second,
            name,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<In, Mid, Out, A, B> Dataflow<In, Out> for Then<A, B, Mid>
where
    In: Send + 'static,
    Mid: Send + 'static,
    Out: Send + 'static,
    A: Dataflow<In, Mid>,
    B: Dataflow<Mid, Out>,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        input: DataSource<In>,
        options: &Options,
        ctx: &ExecutionContext,
    ) -> Result<DataSource<Out>> {
        let mid = self.first.apply(input, options, ctx).await?;
        self.second.apply(mid, options, ctx).await
    }
}
