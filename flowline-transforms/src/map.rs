//! Per-sample mapping stage

use std::sync::Arc;

use async_trait::async_trait;
use flowline_core::accessor::MapAccessor;
use flowline_core::{
    BoxedAccessor, DataSource, DataSourceMeta, Dataflow, ExecutionContext, Options, Result, Sample,
};

type MetaFn = dyn Fn(DataSourceMeta) -> Result<DataSourceMeta> + Send + Sync;

/// Applies a function to every sample of every split, lazily
///
/// The function receives the sample's position within its split. An
/// optional metadata rewrite runs once when the stage is applied, for maps
/// that change the shape of the payload.
pub struct MapStage<F> {
    name: String,
    f: Arc<F>,
    meta_fn: Option<Box<MetaFn>>,
}

impl<F> MapStage<F> {
    /// Create a named mapping stage
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
            meta_fn: None,
        }
    }

    /// Rewrite the metadata when the stage is applied
    #[must_use]
    pub fn with_meta<M>(mut self, meta_fn: M) -> Self
    where
        M: Fn(DataSourceMeta) -> Result<DataSourceMeta> + Send + Sync + 'static,
    {
        self.meta_fn = Some(Box::new(meta_fn));
        self
    }
}

#[async_trait]
impl<In, Out, F> Dataflow<In, Out> for MapStage<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(usize, Sample<In>) -> Result<Sample<Out>> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        input: DataSource<In>,
        _options: &Options,
        _ctx: &ExecutionContext,
    ) -> Result<DataSource<Out>> {
        let mut parts = input.into_parts();
        if let Some(meta_fn) = &self.meta_fn {
            parts.meta = meta_fn(parts.meta)?;
        }

        parts
            .map_accessors(|_, accessor| -> BoxedAccessor<Out> {
                let f = Arc::clone(&self.f);
                Box::new(MapAccessor::new(accessor, move |index, sample| f(index, sample)))
            })
            .build()
    }
}
