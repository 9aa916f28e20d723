//! Split truncation stage

use async_trait::async_trait;
use flowline_core::accessor::WindowAccessor;
use flowline_core::{BoxedAccessor, DataSource, Dataflow, ExecutionContext, Options, OptionsExt, Result, Split};
use tracing::debug;

/// Truncates splits to at most `max_train`, `max_test` and `max_validation`
/// samples; splits without an option are left alone
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitStage;

#[async_trait]
impl<T: Send + 'static> Dataflow<T, T> for LimitStage {
    fn name(&self) -> &str {
        "limit"
    }

    async fn apply(&self, input: DataSource<T>, options: &Options, _ctx: &ExecutionContext) -> Result<DataSource<T>> {
        let max_train = options.option_usize("max_train")?;
        let max_test = options.option_usize("max_test")?;
        let max_validation = options.option_usize("max_validation")?;
        let limit_of = |split: Split| match split {
            Split::Train => max_train,
            Split::Test => max_test,
            Split::Validation => max_validation,
        };

        let mut parts = input.into_parts();
        let size = parts.meta.size_mut();
        if let Some(max) = limit_of(Split::Train) {
            size.train = size.train.min(max);
        }
        if let Some(max) = limit_of(Split::Test) {
            size.test = size.test.min(max);
        }
        if let (Some(max), Some(validation)) = (limit_of(Split::Validation), size.validation.as_mut()) {
            *validation = (*validation).min(max);
        }
        debug!(size = ?parts.meta.size(), "limited splits");

        parts
            .map_accessors(|split, accessor| -> BoxedAccessor<T> {
                match limit_of(split) {
                    Some(max) => Box::new(WindowAccessor::new(accessor, 0, max)),
                    None => accessor,
                }
            })
            // Labels were already checked upstream
            .guard_labels(false)
            .build()
    }
}
