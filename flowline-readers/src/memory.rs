//! In-memory splits

use std::sync::Arc;

use async_trait::async_trait;
use flowline_core::{
    DataSource, DataSourceMeta, DataSourceSize, Error, IndexedAccessor, RecordReader, Result, Sample,
};

/// Reader over samples already held in memory
///
/// Cloning shares the underlying samples.
#[derive(Debug)]
pub struct MemoryReader<T> {
    samples: Arc<[Sample<T>]>,
}

impl<T> Clone for MemoryReader<T> {
    fn clone(&self) -> Self {
        Self {
            samples: Arc::clone(&self.samples),
        }
    }
}

impl<T> MemoryReader<T> {
    /// Take ownership of a split's samples
    pub fn new(samples: Vec<Sample<T>>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    /// The samples, in order
    pub fn samples(&self) -> &[Sample<T>] {
        &self.samples
    }
}

#[async_trait]
impl<T> RecordReader<T> for MemoryReader<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn len(&self) -> usize {
        self.samples.len()
    }

    async fn read(&mut self, index: usize) -> Result<Sample<T>> {
        self.samples
            .get(index)
            .cloned()
            .ok_or_else(|| Error::materialization(index, "index past the end of memory split"))
    }

    async fn read_range(&mut self, start: usize, end: usize) -> Result<Vec<Sample<T>>> {
        self.samples
            .get(start..end)
            .map(<[Sample<T>]>::to_vec)
            .ok_or_else(|| Error::materialization(start, "range past the end of memory split"))
    }
}

/// Accessor over a vector of samples
pub fn memory_accessor<T>(samples: Vec<Sample<T>>) -> IndexedAccessor<T, MemoryReader<T>>
where
    T: Clone + Send + Sync + 'static,
{
    IndexedAccessor::new(MemoryReader::new(samples))
}

/// Build a data source from in-memory splits
///
/// The split sizes in `meta` are replaced by the lengths of the given
/// vectors; everything else in `meta` is validated as usual.
pub fn memory_source<T>(
    mut meta: DataSourceMeta,
    train: Vec<Sample<T>>,
    test: Vec<Sample<T>>,
    validation: Option<Vec<Sample<T>>>,
) -> Result<DataSource<T>>
where
    T: Clone + Send + Sync + 'static,
{
    *meta.size_mut() = DataSourceSize {
        train: train.len(),
        test: test.len(),
        validation: validation.as_ref().map(Vec::len),
    };

    let mut builder = DataSource::builder(meta)
        .train(Box::new(memory_accessor(train)))
        .test(Box::new(memory_accessor(test)));
    if let Some(validation) = validation {
        builder = builder.validation(Box::new(memory_accessor(validation)));
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::accessor::drain;
    use flowline_core::{DataAccessor, ImageDataSourceMeta, ImageDimension, LabelMap, Split};

    fn meta() -> DataSourceMeta {
        DataSourceMeta::Image(ImageDataSourceMeta {
            size: DataSourceSize::new(0, 0),
            dimension: ImageDimension::new(1, 1, 1),
            label_map: LabelMap::from_names(["cat", "dog"]),
        })
    }

    fn samples(labels: &[u32]) -> Vec<Sample<u8>> {
        labels
            .iter()
            .enumerate()
            .map(|(i, &label)| Sample::new(label, i as u8))
            .collect()
    }

    #[tokio::test]
    async fn test_memory_source_sizes_follow_data() {
        let mut source =
            memory_source(meta(), samples(&[0, 1, 1]), samples(&[0]), Some(samples(&[1, 0]))).unwrap();

        let size = *source.meta().size();
        assert_eq!(size, DataSourceSize::new(3, 1).with_validation(2));

        let validation = source.split_mut(Split::Validation).unwrap();
        let all = drain(validation, 8).await.unwrap();
        assert_eq!(all.iter().map(|s| s.label).collect::<Vec<_>>(), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_memory_source_rejects_unknown_label() {
        let mut source = memory_source(meta(), samples(&[0, 7]), samples(&[]), None).unwrap();
        assert!(source.train.next().await.unwrap().is_some());
        assert!(matches!(
            source.train.next().await,
            Err(Error::Materialization { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_clones_share_samples() {
        let reader = MemoryReader::new(samples(&[1, 0]));
        let mut a = IndexedAccessor::new(reader.clone());
        let mut b = IndexedAccessor::new(reader);

        let first = a.next().await.unwrap().unwrap();
        b.seek(b.size()).await.unwrap();
        assert_eq!(first.data, 0);
        assert!(b.next().await.unwrap().is_none());
        assert_eq!(a.position(), 1);
    }
}
