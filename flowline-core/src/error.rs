//! Error types for flowline pipelines
//!
//! Exhaustion of a split is never an error: accessors report it with
//! `Ok(None)`. Everything below halts the invoking stage.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::context::Ecosystem;

/// Result type for flowline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for flowline operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid argument (precondition violation)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Seek target beyond the end of the split
    #[error("Seek position {pos} out of range for split of size {size}")]
    SeekOutOfRange {
        /// Requested position
        pos: usize,
        /// Size of the split
        size: usize,
    },

    /// A record could not be turned into a sample
    #[error("Failed to materialize sample {index}: {reason}")]
    Materialization {
        /// Position of the record within its split
        index: usize,
        /// What went wrong
        reason: String,
    },

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Metadata does not describe the accessors it was bundled with
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// A stage option had the wrong shape
    #[error("Invalid option '{key}': {reason}")]
    InvalidOption {
        /// Option key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// Module could not be located by the backend
    #[error("Module '{name}' not found in {ecosystem} ecosystem")]
    ModuleNotFound {
        /// Backend the import was routed to
        ecosystem: Ecosystem,
        /// Requested module name
        name: String,
    },

    /// Module was located but could not be loaded
    #[error("Failed to load {ecosystem} module '{name}': {reason}")]
    ModuleLoad {
        /// Backend the import was routed to
        ecosystem: Ecosystem,
        /// Requested module name
        name: String,
        /// Loader diagnostic
        reason: String,
    },

    /// No backend registered for an ecosystem
    #[error("No module loader registered for {0}")]
    NoLoader(Ecosystem),

    /// No model has been saved for the current pipeline
    #[error("No model saved for pipeline {0}")]
    ModelNotFound(String),

    /// The workspace is owned by another pipeline run
    #[error("Workspace {0} is locked by another pipeline run")]
    WorkspaceLocked(PathBuf),

    /// An accessor call did not finish before its deadline
    #[error("Accessor call exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// Binary serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Dataflow stage error
    #[error("Stage '{stage}' failed: {reason}")]
    Stage {
        /// Stage name
        stage: String,
        /// Failure description
        reason: String,
    },

    /// Error raised by user script code
    #[error("Script error: {0}")]
    Script(#[from] anyhow::Error),
}

impl Error {
    /// Build a materialization error for the record at `index`
    pub fn materialization(index: usize, reason: impl Into<String>) -> Self {
        Self::Materialization {
            index,
            reason: reason.into(),
        }
    }

    /// Build a stage error
    pub fn stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a precondition violation by the caller
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_) | Error::SeekOutOfRange { .. } | Error::InvalidOption { .. }
        )
    }
}
