//! Host side of flowline pipelines
//!
//! This crate owns everything a pipeline run needs from its environment:
//! an exclusive workspace, filesystem module loaders behind the
//! [`ModuleBridge`](flowline_core::ModuleBridge), a [`LocalRuntime`] that
//! stores models and forwards progress, and a [`PipelineRunner`] that drives
//! the data source, dataflow and model scripts of a
//! [`PipelineMeta`](flowline_core::PipelineMeta) in order.

#![warn(missing_docs)]

pub mod config;
pub mod host;
pub mod loader;
pub mod local;
pub mod logging;
pub mod runner;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use config::{ModulePaths, RuntimeConfig};
pub use host::bootstrap;
pub use loader::FsModuleLoader;
pub use local::{LocalRuntime, ModelManifest};
pub use logging::init_tracing;
pub use runner::PipelineRunner;
pub use workspace::WorkspaceGuard;
