//! Stock dataflow stages
//!
//! Decorating stages ([`MapStage`], [`LimitStage`]) wrap the accessors of
//! their input and read nothing up front. Materializing stages
//! ([`ShuffleStage`], [`CacheStage`], [`TableEncodeStage`]) read their input
//! while being applied and serve the result from memory or from the cache
//! directory of the workspace.

#![warn(missing_docs)]

pub mod cache;
pub mod encode;
pub mod limit;
pub mod map;
pub mod shuffle;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::CacheStage;
pub use encode::TableEncodeStage;
pub use limit::LimitStage;
pub use map::MapStage;
pub use shuffle::ShuffleStage;

/// Batch size used when a stage drains its input
pub(crate) const DRAIN_BATCH: usize = 256;
