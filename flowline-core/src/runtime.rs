//! Runtime façade used by model-training scripts

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::dataflow::Options;
use crate::error::{Error, Result};
use crate::source::DataSource;

/// Which part of the pipeline the current process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Data source and dataflow scripts only
    Data,
    /// Model script
    Model,
    /// Every script
    All,
    /// Not determined
    #[default]
    Unknown,
}

impl TaskType {
    /// Whether the model script runs under this task type
    pub fn runs_model(self) -> bool {
        matches!(self, TaskType::Model | TaskType::All)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::Data => "data",
            TaskType::Model => "model",
            TaskType::All => "all",
            TaskType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "data" => Ok(TaskType::Data),
            "model" => Ok(TaskType::Model),
            "all" => Ok(TaskType::All),
            "unknown" => Ok(TaskType::Unknown),
            other => Err(Error::InvalidArgument(format!("unknown task type: {other}"))),
        }
    }
}

/// Progress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    /// Percentage in `0..=100`
    pub progress_value: f64,

    /// Diagnostic payload passed through untouched
    #[serde(default)]
    pub extend_data: Options,
}

impl ProgressInfo {
    /// Create a progress report, rejecting values outside `0..=100`
    pub fn new(progress_value: f64, extend_data: Options) -> Result<Self> {
        if !(0.0..=100.0).contains(&progress_value) {
            return Err(Error::InvalidArgument(format!(
                "progress value must be within 0..=100, got {progress_value}"
            )));
        }
        Ok(Self {
            progress_value,
            extend_data,
        })
    }

    /// Progress report without diagnostics
    pub fn percent(progress_value: f64) -> Result<Self> {
        Self::new(progress_value, Options::new())
    }
}

/// Model data handed to [`Runtime::save_model`]
pub enum ModelSource {
    /// Already materialized file
    Path(PathBuf),
    /// Readable byte stream
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl ModelSource {
    /// Model from a file
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ModelSource::Path(path.into())
    }

    /// Model from a stream
    pub fn stream<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        ModelSource::Stream(Box::new(reader))
    }
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        ModelSource::Path(path)
    }
}

impl From<&Path> for ModelSource {
    fn from(path: &Path) -> Self {
        ModelSource::Path(path.to_path_buf())
    }
}

impl fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ModelSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A script invocation inside a pipeline description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSpec {
    /// Location of the script
    pub uri: String,

    /// Options passed to the script
    #[serde(default)]
    pub options: Options,
}

/// Static description of the pipeline being executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMeta {
    /// Pipeline identity; model artifacts are scoped to it
    pub id: String,

    /// Human readable name
    #[serde(default)]
    pub name: Option<String>,

    /// Data source script
    pub data_source: ScriptSpec,

    /// Dataflow scripts in application order
    #[serde(default)]
    pub dataflow: Vec<ScriptSpec>,

    /// Model script
    #[serde(default)]
    pub model: Option<ScriptSpec>,

    /// Pipeline-wide options
    #[serde(default)]
    pub options: Options,
}

impl PipelineMeta {
    /// Load a pipeline description from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Host-side façade for model scripts
#[async_trait]
pub trait Runtime<T: Send + 'static>: Send + Sync {
    /// Description of the running pipeline
    async fn pipeline_meta(&self) -> Result<PipelineMeta>;

    /// Current task type; never blocks
    fn task_type(&self) -> TaskType;

    /// Report progress; fire and forget
    fn notify_progress(&self, progress: ProgressInfo);

    /// Persist a model artifact under `filename`
    async fn save_model(&self, source: ModelSource, filename: &str) -> Result<()>;

    /// Path of the last saved model of this pipeline
    ///
    /// Fails with [`Error::ModelNotFound`] when nothing was saved.
    async fn read_model(&self) -> Result<PathBuf>;

    /// The resolved data source, already passed through the dataflow stages
    fn data_source(&mut self) -> &mut DataSource<T>;
}
