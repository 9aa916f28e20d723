//! Script entry contracts at the pipeline boundary
//!
//! A pipeline is one [`DataSourceEntry`], any number of
//! [`Dataflow`](crate::Dataflow) stages and optionally one [`ModelEntry`].

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::dataflow::Options;
use crate::error::Result;
use crate::runtime::Runtime;
use crate::source::DataSource;

/// Script producing the initial data source
#[async_trait]
pub trait DataSourceEntry<T: Send + 'static>: Send + Sync {
    /// Build the data source; split sizes must be known when this returns
    async fn load(&self, options: &Options, ctx: &ExecutionContext) -> Result<DataSource<T>>;
}

/// Script consuming the final data source through a [`Runtime`]
#[async_trait]
pub trait ModelEntry<T: Send + 'static>: Send + Sync {
    /// Run the model script
    async fn run(
        &self,
        runtime: &mut dyn Runtime<T>,
        options: &Options,
        ctx: &ExecutionContext,
    ) -> Result<()>;
}
