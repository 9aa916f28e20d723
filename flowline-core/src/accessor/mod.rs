//! Data accessor contract
//!
//! A [`DataAccessor`] is a cursor over one split of a data source. It
//! supports single pulls, batched pulls and absolute repositioning.
//!
//! - Exhaustion is reported as `Ok(None)`, never as an error, and calling
//!   `next` again after exhaustion keeps returning `Ok(None)`.
//! - A zero batch size and a seek target past the split size are
//!   precondition violations and fail without touching the cursor.
//! - A record that cannot be materialized surfaces as
//!   [`Error::Materialization`](crate::Error::Materialization) and the cursor
//!   stays on that record.
//!
//! All methods take `&mut self`: an accessor has exactly one owner at a time,
//! so calls against one instance are serialized by construction. Distinct
//! accessors (for example `train` and `test` of the same source) are
//! independent and can be driven concurrently.
//!
//! There is no cancellation primitive in the contract. Dropping an
//! in-flight future is the ambient way to cancel; [`TimeoutAccessor`] wraps
//! that into a deadline for callers that want one.

mod decorator;
mod indexed;
mod timeout;

use async_trait::async_trait;
use futures::stream::{self, Stream};

use crate::error::{Error, Result};
use crate::sample::Sample;

pub use decorator::{LabelGuard, MapAccessor, WindowAccessor};
pub use indexed::{IndexedAccessor, RecordReader};
pub use timeout::TimeoutAccessor;

/// Boxed accessor, the form stored in a [`DataSource`](crate::DataSource)
pub type BoxedAccessor<T> = Box<dyn DataAccessor<T>>;

/// Cursor over one split of a data source
#[async_trait]
pub trait DataAccessor<T: Send + 'static>: Send {
    /// Return the sample at the current position and advance by one
    ///
    /// Returns `Ok(None)` once the position has reached the split size.
    async fn next(&mut self) -> Result<Option<Sample<T>>>;

    /// Return up to `batch_size` consecutive samples and advance past them
    ///
    /// Returns `Ok(None)` only when the cursor is already exhausted; a short
    /// final batch is a regular batch.
    async fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Sample<T>>>> {
        check_batch_size(batch_size)?;
        if self.remaining() == 0 {
            return Ok(None);
        }

        let start = self.position();
        let mut batch = Vec::with_capacity(batch_size.min(self.remaining()));
        while batch.len() < batch_size {
            match self.next().await {
                Ok(Some(sample)) => batch.push(sample),
                Ok(None) => break,
                Err(e) => {
                    // Position only moves by what was actually returned
                    self.seek(start).await?;
                    return Err(e);
                }
            }
        }

        Ok(if batch.is_empty() { None } else { Some(batch) })
    }

    /// Move the cursor to an absolute 0-based position
    ///
    /// `pos == size()` is accepted and leaves the cursor exhausted;
    /// `pos > size()` fails with [`Error::SeekOutOfRange`].
    async fn seek(&mut self, pos: usize) -> Result<()>;

    /// Number of samples in the split
    fn size(&self) -> usize;

    /// Current cursor position
    fn position(&self) -> usize;

    /// Samples left before exhaustion
    fn remaining(&self) -> usize {
        self.size().saturating_sub(self.position())
    }
}

/// Reject zero batch sizes
pub fn check_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(Error::InvalidArgument(
            "batch size must be a positive integer".into(),
        ));
    }
    Ok(())
}

/// Reject seek targets past the end of a split
pub fn check_seek(pos: usize, size: usize) -> Result<()> {
    if pos > size {
        return Err(Error::SeekOutOfRange { pos, size });
    }
    Ok(())
}

/// Read every remaining sample of an accessor
pub async fn drain<T, A>(accessor: &mut A, batch_size: usize) -> Result<Vec<Sample<T>>>
where
    T: Send + 'static,
    A: DataAccessor<T> + ?Sized,
{
    check_batch_size(batch_size)?;
    let mut samples = Vec::with_capacity(accessor.remaining());
    while let Some(batch) = accessor.next_batch(batch_size).await? {
        samples.extend(batch);
    }
    Ok(samples)
}

/// Expose an accessor as a stream of samples
///
/// The stream ends at exhaustion, or right after yielding the first error.
pub fn into_stream<T, A>(accessor: A) -> impl Stream<Item = Result<Sample<T>>>
where
    T: Send + 'static,
    A: DataAccessor<T>,
{
    stream::unfold(Some(accessor), |state| async move {
        let mut accessor = state?;
        match accessor.next().await {
            Ok(Some(sample)) => Some((Ok(sample), Some(accessor))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

#[async_trait]
impl<T: Send + 'static> DataAccessor<T> for BoxedAccessor<T> {
    async fn next(&mut self) -> Result<Option<Sample<T>>> {
        (**self).next().await
    }

    async fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Sample<T>>>> {
        (**self).next_batch(batch_size).await
    }

    async fn seek(&mut self, pos: usize) -> Result<()> {
        (**self).seek(pos).await
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn position(&self) -> usize {
        (**self).position()
    }
}
