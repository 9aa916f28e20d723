//! Seeded shuffling stage

use async_trait::async_trait;
use flowline_core::accessor::drain;
use flowline_core::{BoxedAccessor, DataAccessor, DataSource, Dataflow, ExecutionContext, Options, OptionsExt, Result, Sample};
use flowline_readers::memory_source;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use crate::DRAIN_BATCH;

async fn read_split<T: Send + 'static>(accessor: &mut BoxedAccessor<T>) -> Result<Vec<Sample<T>>> {
    accessor.seek(0).await?;
    drain(accessor, DRAIN_BATCH).await
}

/// Reads every split into memory and serves it in shuffled order
///
/// Option `seed` fixes the permutation; without it a random seed is drawn
/// and logged so the run can be reproduced.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShuffleStage;

#[async_trait]
impl<T> Dataflow<T, T> for ShuffleStage
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "shuffle"
    }

    async fn apply(&self, input: DataSource<T>, options: &Options, _ctx: &ExecutionContext) -> Result<DataSource<T>> {
        let seed = match options.option_u64("seed")? {
            Some(seed) => seed,
            None => rand::random(),
        };
        info!(seed, "shuffling data source");
        let mut rng = StdRng::seed_from_u64(seed);

        let mut parts = input.into_parts();
        let mut train = read_split(&mut parts.train).await?;
        let mut test = read_split(&mut parts.test).await?;
        let mut validation = match parts.validation.as_mut() {
            Some(accessor) => Some(read_split(accessor).await?),
            None => None,
        };

        train.shuffle(&mut rng);
        test.shuffle(&mut rng);
        if let Some(validation) = validation.as_mut() {
            validation.shuffle(&mut rng);
        }

        memory_source(parts.meta, train, test, validation)
    }
}
