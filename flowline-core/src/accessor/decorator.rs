//! Accessors wrapping other accessors

use std::sync::Arc;

use async_trait::async_trait;

use crate::accessor::{check_batch_size, check_seek, BoxedAccessor, DataAccessor};
use crate::error::{Error, Result};
use crate::sample::Sample;
use crate::schema::LabelMap;

/// Applies a fallible function to every sample of the inner accessor
///
/// The function receives the position of the sample within the split. When
/// it fails, the inner cursor is moved back so the failing sample is not
/// skipped.
pub struct MapAccessor<T: Send + 'static, U, F> {
    inner: BoxedAccessor<T>,
    f: F,
    _marker: std::marker::PhantomData<fn() -> U>,
}

impl<T, U, F> MapAccessor<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(usize, Sample<T>) -> Result<Sample<U>> + Send + Sync,
{
    /// Wrap an accessor
    pub fn new(inner: BoxedAccessor<T>, f: F) -> Self {
        Self {
            inner,
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<T, U, F> DataAccessor<U> for MapAccessor<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(usize, Sample<T>) -> Result<Sample<U>> + Send + Sync,
{
    async fn next(&mut self) -> Result<Option<Sample<U>>> {
        let start = self.inner.position();
        let Some(sample) = self.inner.next().await? else {
            return Ok(None);
        };

        match (self.f)(start, sample) {
            Ok(mapped) => Ok(Some(mapped)),
            Err(e) => {
                self.inner.seek(start).await?;
                Err(e)
            }
        }
    }

    async fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Sample<U>>>> {
        let start = self.inner.position();
        let Some(batch) = self.inner.next_batch(batch_size).await? else {
            return Ok(None);
        };

        let mapped = batch
            .into_iter()
            .enumerate()
            .map(|(offset, sample)| (self.f)(start + offset, sample))
            .collect::<Result<Vec<_>>>();
        match mapped {
            Ok(mapped) => Ok(Some(mapped)),
            Err(e) => {
                self.inner.seek(start).await?;
                Err(e)
            }
        }
    }

    async fn seek(&mut self, pos: usize) -> Result<()> {
        self.inner.seek(pos).await
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn position(&self) -> usize {
        self.inner.position()
    }
}

/// Contiguous sub-range `offset..offset + len` of the inner accessor
pub struct WindowAccessor<T: Send + 'static> {
    inner: BoxedAccessor<T>,
    offset: usize,
    len: usize,
    pos: usize,
}

impl<T: Send + 'static> WindowAccessor<T> {
    /// Create a window; it is clamped to the inner split
    pub fn new(inner: BoxedAccessor<T>, offset: usize, len: usize) -> Self {
        let offset = offset.min(inner.size());
        let len = len.min(inner.size() - offset);
        Self {
            inner,
            offset,
            len,
            pos: 0,
        }
    }

    /// Put the inner cursor where this window expects it
    async fn align(&mut self) -> Result<()> {
        let target = self.offset + self.pos;
        if self.inner.position() != target {
            self.inner.seek(target).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Send + 'static> DataAccessor<T> for WindowAccessor<T> {
    async fn next(&mut self) -> Result<Option<Sample<T>>> {
        if self.pos >= self.len {
            return Ok(None);
        }

        self.align().await?;
        match self.inner.next().await? {
            Some(sample) => {
                self.pos += 1;
                Ok(Some(sample))
            }
            None => Err(Error::materialization(
                self.offset + self.pos,
                "inner accessor exhausted before its declared size",
            )),
        }
    }

    async fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Sample<T>>>> {
        check_batch_size(batch_size)?;
        if self.pos >= self.len {
            return Ok(None);
        }

        self.align().await?;
        let wanted = batch_size.min(self.len - self.pos);
        let batch = self.inner.next_batch(wanted).await?.unwrap_or_default();
        if batch.len() != wanted {
            return Err(Error::materialization(
                self.offset + self.pos,
                "inner accessor exhausted before its declared size",
            ));
        }

        self.pos += wanted;
        Ok(Some(batch))
    }

    async fn seek(&mut self, pos: usize) -> Result<()> {
        check_seek(pos, self.len)?;
        self.pos = pos;
        Ok(())
    }

    fn size(&self) -> usize {
        self.len
    }

    fn position(&self) -> usize {
        self.pos
    }
}

/// Rejects samples whose label has no entry in the label map
pub struct LabelGuard<T: Send + 'static> {
    inner: BoxedAccessor<T>,
    labels: Arc<LabelMap>,
}

impl<T: Send + 'static> LabelGuard<T> {
    /// Guard an accessor with a label map
    pub fn new(inner: BoxedAccessor<T>, labels: Arc<LabelMap>) -> Self {
        Self { inner, labels }
    }

    fn check(&self, index: usize, sample: &Sample<T>) -> Result<()> {
        if self.labels.contains(sample.label) {
            Ok(())
        } else {
            Err(Error::materialization(
                index,
                format!("label {} has no entry in the label map", sample.label),
            ))
        }
    }
}

#[async_trait]
impl<T: Send + 'static> DataAccessor<T> for LabelGuard<T> {
    async fn next(&mut self) -> Result<Option<Sample<T>>> {
        let start = self.inner.position();
        let Some(sample) = self.inner.next().await? else {
            return Ok(None);
        };

        if let Err(e) = self.check(start, &sample) {
            self.inner.seek(start).await?;
            return Err(e);
        }
        Ok(Some(sample))
    }

    async fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Sample<T>>>> {
        let start = self.inner.position();
        let Some(batch) = self.inner.next_batch(batch_size).await? else {
            return Ok(None);
        };

        let checked = batch
            .iter()
            .enumerate()
            .try_for_each(|(offset, sample)| self.check(start + offset, sample));
        if let Err(e) = checked {
            self.inner.seek(start).await?;
            return Err(e);
        }
        Ok(Some(batch))
    }

    async fn seek(&mut self, pos: usize) -> Result<()> {
        self.inner.seek(pos).await
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn position(&self) -> usize {
        self.inner.position()
    }
}
