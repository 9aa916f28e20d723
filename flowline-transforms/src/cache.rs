//! Workspace cache stage

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flowline_core::{
    BoxedAccessor, DataAccessor, DataSource, Dataflow, ExecutionContext, IndexedAccessor, Options,
    OptionsExt, Result, Split,
};
use flowline_readers::{BinaryRecordReader, BinaryRecordWriter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::DRAIN_BATCH;

/// Materializes every split into record files under the workspace cache
/// directory and serves the splits from there
///
/// Files land in `<cache_dir>/<name>/<split>.rec`, where `name` is the
/// `name` option or a fresh UUID.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStage;

async fn write_split<T>(accessor: &mut BoxedAccessor<T>, path: &Path) -> Result<BoxedAccessor<T>>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    accessor.seek(0).await?;
    let mut writer = BinaryRecordWriter::create(path)?;
    while let Some(batch) = accessor.next_batch(DRAIN_BATCH).await? {
        for sample in &batch {
            writer.append(sample)?;
        }
    }
    writer.finish()?;

    let reader = BinaryRecordReader::open(path)?;
    Ok(Box::new(IndexedAccessor::new(reader)))
}

#[async_trait]
impl<T> Dataflow<T, T> for CacheStage
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn name(&self) -> &str {
        "cache"
    }

    async fn apply(&self, input: DataSource<T>, options: &Options, ctx: &ExecutionContext) -> Result<DataSource<T>> {
        let name = options
            .option_str("name")?
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let dir: PathBuf = ctx.workspace.cache_dir.join(name);
        tokio::fs::create_dir_all(&dir).await?;

        let mut parts = input.into_parts();
        let train = write_split(&mut parts.train, &dir.join(format!("{}.rec", Split::Train))).await?;
        let test = write_split(&mut parts.test, &dir.join(format!("{}.rec", Split::Test))).await?;
        let validation = match parts.validation.as_mut() {
            Some(accessor) => {
                Some(write_split(accessor, &dir.join(format!("{}.rec", Split::Validation))).await?)
            }
            None => None,
        };
        info!(dir = %dir.display(), size = ?parts.meta.size(), "cached data source");

        let mut builder = DataSource::builder(parts.meta)
            .train(train)
            .test(test)
            .guard_labels(false);
        if let Some(validation) = validation {
            builder = builder.validation(validation);
        }
        builder.build()
    }
}
