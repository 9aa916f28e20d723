//! Deadline decorator

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::accessor::{BoxedAccessor, DataAccessor};
use crate::error::{Error, Result};
use crate::sample::Sample;

/// Fails any call that does not finish within `deadline`
///
/// The in-flight call is dropped on expiry. Accessors built on
/// [`IndexedAccessor`](crate::accessor::IndexedAccessor) only move their
/// cursor after a read completes, so an expired call leaves the position
/// where it was.
pub struct TimeoutAccessor<T: Send + 'static> {
    inner: BoxedAccessor<T>,
    deadline: Duration,
}

impl<T: Send + 'static> TimeoutAccessor<T> {
    /// Wrap an accessor with a per-call deadline
    pub fn new(inner: BoxedAccessor<T>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

async fn within<F, R>(deadline: Duration, fut: F) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| Error::DeadlineExceeded(deadline))?
}

#[async_trait]
impl<T: Send + 'static> DataAccessor<T> for TimeoutAccessor<T> {
    async fn next(&mut self) -> Result<Option<Sample<T>>> {
        within(self.deadline, self.inner.next()).await
    }

    async fn next_batch(&mut self, batch_size: usize) -> Result<Option<Vec<Sample<T>>>> {
        within(self.deadline, self.inner.next_batch(batch_size)).await
    }

    async fn seek(&mut self, pos: usize) -> Result<()> {
        within(self.deadline, self.inner.seek(pos)).await
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn position(&self) -> usize {
        self.inner.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::tests::accessor;

    struct Stalled;

    #[async_trait]
    impl DataAccessor<String> for Stalled {
        async fn next(&mut self) -> Result<Option<Sample<String>>> {
            futures::future::pending().await
        }

        async fn seek(&mut self, _pos: usize) -> Result<()> {
            Ok(())
        }

        fn size(&self) -> usize {
            1
        }

        fn position(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_fast_calls_pass_through() {
        let mut acc = TimeoutAccessor::new(Box::new(accessor(&[0, 1])), Duration::from_secs(5));
        assert_eq!(acc.next_batch(5).await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stalled_call_expires() {
        let mut acc = TimeoutAccessor::new(Box::new(Stalled), Duration::from_millis(10));
        let err = acc.next().await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
    }
}
