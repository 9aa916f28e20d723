//! Cursor state machine over random-access storage

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::debug;

use crate::accessor::{check_batch_size, check_seek, DataAccessor};
use crate::error::{Error, Result};
use crate::sample::Sample;

/// Random-access storage for one split
///
/// Storage adapters implement this and get the whole accessor contract from
/// [`IndexedAccessor`]. `len` must be exact and must not change.
#[async_trait]
pub trait RecordReader<T: Send + 'static>: Send {
    /// Number of records in the split
    fn len(&self) -> usize;

    /// Whether the split is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the record at `index` (always `< len()`)
    async fn read(&mut self, index: usize) -> Result<Sample<T>>;

    /// Materialize records `start..end`
    ///
    /// Adapters with a cheaper bulk path should override this.
    async fn read_range(&mut self, start: usize, end: usize) -> Result<Vec<Sample<T>>> {
        let mut samples = Vec::with_capacity(end.saturating_sub(start));
        for index in start..end {
            samples.push(self.read(index).await?);
        }
        Ok(samples)
    }
}

/// Accessor driving a [`RecordReader`] with a cursor
///
/// The cursor moves only after the reader returned successfully, so a
/// failed or dropped read leaves it on the record that was being read.
pub struct IndexedAccessor<T, R> {
    /// Underlying storage, owned exclusively by this accessor
    reader: R,

    /// Current position
    pos: usize,

    /// Split size, fixed at construction
    size: usize,

    _marker: PhantomData<fn() -> T>,
}

impl<T, R> IndexedAccessor<T, R>
where
    T: Send + 'static,
    R: RecordReader<T>,
{
    /// Create a fresh accessor positioned at the start of the split
    pub fn new(reader: R) -> Self {
        let size = reader.len();
        debug!(size, "created indexed accessor");
        Self {
            reader,
            pos: 0,
            size,
            _marker: PhantomData,
        }
    }

    /// Get a reference to the underlying reader
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Give the reader back
    pub fn into_reader(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<T, R> DataAccessor<T> for IndexedAccessor<T, R>
where
    T: Send + 'static,
    R: RecordReader<T>,
{
    async fn next(&mut self) -> Result<Option<Sample<T>>> {
        if self.pos >= self.size {
            return Ok(None);
        }

        let sample = self.reader.read(self.pos).await?;
        self.pos += 1;
        Ok(Some(sample))
    }

    async fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Sample<T>>>> {
        check_batch_size(batch_size)?;
        if self.pos >= self.size {
            return Ok(None);
        }

        let end = self.pos.saturating_add(batch_size).min(self.size);
        let batch = self.reader.read_range(self.pos, end).await?;
        if batch.len() != end - self.pos {
            return Err(Error::materialization(
                self.pos,
                format!(
                    "reader returned {} records for range {}..{}",
                    batch.len(),
                    self.pos,
                    end
                ),
            ));
        }

        self.pos = end;
        Ok(Some(batch))
    }

    async fn seek(&mut self, pos: usize) -> Result<()> {
        check_seek(pos, self.size)?;
        debug!(from = self.pos, to = pos, "seek");
        self.pos = pos;
        Ok(())
    }

    fn size(&self) -> usize {
        self.size
    }

    fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Reader over labels with `"row-{i}"` payloads; a label of `u32::MAX`
    /// marks a corrupt record
    pub(crate) struct VecReader {
        labels: Vec<u32>,
    }

    impl VecReader {
        pub(crate) fn new(labels: &[u32]) -> Self {
            Self {
                labels: labels.to_vec(),
            }
        }
    }

    #[async_trait]
    impl RecordReader<String> for VecReader {
        fn len(&self) -> usize {
            self.labels.len()
        }

        async fn read(&mut self, index: usize) -> Result<Sample<String>> {
            match self.labels[index] {
                u32::MAX => Err(Error::materialization(index, "corrupt record")),
                label => Ok(Sample::new(label, format!("row-{index}"))),
            }
        }
    }

    #[tokio::test]
    async fn test_table_scenario() {
        let mut train = IndexedAccessor::new(VecReader::new(&[0, 1, 0]));

        let mut labels = Vec::new();
        for _ in 0..3 {
            labels.push(train.next().await.unwrap().unwrap().label);
        }
        assert_eq!(labels, vec![0, 1, 0]);
        assert!(train.next().await.unwrap().is_none());
        assert!(train.next().await.unwrap().is_none());

        train.seek(1).await.unwrap();
        let sample = train.next().await.unwrap().unwrap();
        assert_eq!(sample.data, "row-1");
    }

    #[tokio::test]
    async fn test_short_final_batch() {
        let mut acc = IndexedAccessor::new(VecReader::new(&[0; 5]));
        assert_eq!(acc.next_batch(2).await.unwrap().unwrap().len(), 2);
        assert_eq!(acc.next_batch(2).await.unwrap().unwrap().len(), 2);
        assert_eq!(acc.next_batch(2).await.unwrap().unwrap().len(), 1);
        assert!(acc.next_batch(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_batch_size_rejected() {
        let mut acc = IndexedAccessor::new(VecReader::new(&[0, 1]));
        let err = acc.next_batch(0).await.unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(acc.position(), 0);
    }

    #[tokio::test]
    async fn test_seek_bounds() {
        let mut acc = IndexedAccessor::new(VecReader::new(&[0, 1, 2]));
        acc.seek(3).await.unwrap();
        assert!(acc.next().await.unwrap().is_none());

        let err = acc.seek(4).await.unwrap_err();
        assert!(matches!(err, Error::SeekOutOfRange { pos: 4, size: 3 }));
        assert_eq!(acc.position(), 3);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_not_exhaustion() {
        let mut acc = IndexedAccessor::new(VecReader::new(&[0, u32::MAX, 2]));
        acc.next().await.unwrap();

        let err = acc.next().await.unwrap_err();
        assert!(matches!(err, Error::Materialization { index: 1, .. }));
        assert_eq!(acc.position(), 1);

        let err = acc.next_batch(2).await.unwrap_err();
        assert!(matches!(err, Error::Materialization { .. }));
        assert_eq!(acc.position(), 1);
    }

    #[tokio::test]
    async fn test_empty_split() {
        let mut acc = IndexedAccessor::new(VecReader::new(&[]));
        assert!(acc.next().await.unwrap().is_none());
        assert!(acc.next_batch(4).await.unwrap().is_none());
        acc.seek(0).await.unwrap();
    }
}
