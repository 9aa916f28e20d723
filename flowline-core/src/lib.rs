//! Core contracts for lazy, pull-based ML data pipelines
//!
//! This crate defines the data accessor protocol that every split of a
//! [`DataSource`] implements, the metadata describing a source, the
//! [`Dataflow`] stage contract, the [`ExecutionContext`] with its module
//! bridge, and the [`Runtime`] façade model scripts talk to.
//!
//! Readers live in `flowline-readers`, stock stages in
//! `flowline-transforms` and the host side in `flowline-runtime`.

#![warn(missing_docs)]

pub mod accessor;
pub mod context;
pub mod dataflow;
pub mod entry;
pub mod error;
pub mod io;
pub mod runtime;
pub mod sample;
pub mod schema;
pub mod source;

// Re-export key types for convenience
pub use accessor::{BoxedAccessor, DataAccessor, IndexedAccessor, RecordReader};
pub use context::{Ecosystem, ExecutionContext, ModuleBridge, ModuleHandle, ModuleLoader, ModuleSpec, Workspace};
pub use dataflow::{BoxedDataflow, Dataflow, DataflowChain, Options, OptionsExt};
pub use entry::{DataSourceEntry, ModelEntry};
pub use error::{Error, Result};
pub use runtime::{ModelSource, PipelineMeta, ProgressInfo, Runtime, ScriptSpec, TaskType};
pub use sample::{Sample, Split};
pub use schema::{
    DataSourceMeta, DataSourceSize, DataSourceType, ImageDataSourceMeta, ImageDimension, LabelMap,
    TableColumn, TableColumnType, TableDataSourceMeta, TableSchema,
};
pub use source::{DataSource, DataSourceBuilder};
