//! In-process runtime backed by the workspace model directory

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::{
    DataSource, Error, ModelSource, PipelineMeta, ProgressInfo, Result, Runtime, TaskType,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name of the manifest recording the last saved model of a pipeline
pub const MANIFEST: &str = "model.json";

/// Record of the last model saved for a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelManifest {
    /// Pipeline the model belongs to
    pub pipeline_id: String,
    /// File name inside the pipeline's model directory
    pub filename: String,
    /// Size of the artifact
    pub bytes: u64,
    /// When the artifact was saved
    pub saved_at: DateTime<Utc>,
}

/// [`Runtime`] running model scripts in this process
///
/// Models are stored under `<model_dir>/<pipeline id>/`, next to a
/// [`MANIFEST`] naming the latest one. Progress reports are logged and, if a
/// subscriber exists, forwarded over a bounded channel; reports that do not
/// fit are dropped.
#[derive(Debug)]
pub struct LocalRuntime<T: Send + 'static> {
    pipeline: PipelineMeta,
    task_type: TaskType,
    model_dir: PathBuf,
    progress: Option<mpsc::Sender<ProgressInfo>>,
    data_source: Mutex<DataSource<T>>,
}

impl<T: Send + 'static> LocalRuntime<T> {
    /// Create a runtime for one pipeline run
    pub fn new(
        pipeline: PipelineMeta,
        task_type: TaskType,
        model_root: impl AsRef<Path>,
        data_source: DataSource<T>,
    ) -> Self {
        let model_dir = model_root.as_ref().join(&pipeline.id);
        Self {
            pipeline,
            task_type,
            model_dir,
            progress: None,
            data_source: Mutex::new(data_source),
        }
    }

    /// Receive progress reports; replaces any earlier subscriber
    pub fn subscribe_progress(&mut self, buffer: usize) -> mpsc::Receiver<ProgressInfo> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.progress = Some(tx);
        rx
    }

    /// Forward progress reports to an existing channel
    pub fn set_progress_sender(&mut self, sender: mpsc::Sender<ProgressInfo>) {
        self.progress = Some(sender);
    }

    /// Directory holding this pipeline's models
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Give the data source back
    pub fn into_data_source(self) -> DataSource<T> {
        self.data_source.into_inner()
    }

    async fn read_manifest(&self) -> Result<Option<ModelManifest>> {
        match tokio::fs::read(self.model_dir.join(MANIFEST)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn check_filename(filename: &str) -> Result<()> {
    let mut components = Path::new(filename).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || filename == MANIFEST || filename.starts_with('.') {
        return Err(Error::InvalidArgument(format!(
            "model file name '{filename}' must be a plain, non-hidden file name other than {MANIFEST}"
        )));
    }
    Ok(())
}

/// Write `bytes` next to `path` and move them into place
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_file_name(format!(".{}.tmp", Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn copy_into_place(source: ModelSource, tmp: &Path, target: &Path) -> std::io::Result<u64> {
    let bytes = match source {
        ModelSource::Path(path) => tokio::fs::copy(&path, tmp).await?,
        ModelSource::Stream(mut reader) => {
            let mut file = tokio::fs::File::create(tmp).await?;
            let copied = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            copied
        }
    };
    tokio::fs::rename(tmp, target).await?;
    Ok(bytes)
}

#[async_trait]
impl<T: Send + 'static> Runtime<T> for LocalRuntime<T> {
    async fn pipeline_meta(&self) -> Result<PipelineMeta> {
        Ok(self.pipeline.clone())
    }

    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn notify_progress(&self, progress: ProgressInfo) {
        info!(
            pipeline = %self.pipeline.id,
            progress = progress.progress_value,
            "model progress"
        );
        if let Some(tx) = &self.progress {
            if let Err(e) = tx.try_send(progress) {
                warn!(pipeline = %self.pipeline.id, error = %e, "progress report dropped");
            }
        }
    }

    async fn save_model(&self, source: ModelSource, filename: &str) -> Result<()> {
        check_filename(filename)?;
        tokio::fs::create_dir_all(&self.model_dir).await?;

        let target = self.model_dir.join(filename);
        let tmp = self.model_dir.join(format!(".{filename}.{}.tmp", Uuid::new_v4()));
        let written = copy_into_place(source, &tmp, &target).await;
        let bytes = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                    debug!(tmp = %tmp.display(), error = %cleanup, "no partial model to remove");
                }
                return Err(e.into());
            }
        };

        let manifest = ModelManifest {
            pipeline_id: self.pipeline.id.clone(),
            filename: filename.to_string(),
            bytes,
            saved_at: Utc::now(),
        };
        write_atomic(&self.model_dir.join(MANIFEST), &serde_json::to_vec_pretty(&manifest)?).await?;

        info!(pipeline = %self.pipeline.id, filename, bytes, "model saved");
        Ok(())
    }

    async fn read_model(&self) -> Result<PathBuf> {
        let missing = || Error::ModelNotFound(self.pipeline.id.clone());
        let manifest = self
            .read_manifest()
            .await?
            .filter(|m| m.pipeline_id == self.pipeline.id)
            .ok_or_else(missing)?;

        let path = self.model_dir.join(&manifest.filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(missing()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(missing()),
            Err(e) => Err(e.into()),
        }
    }

    fn data_source(&mut self) -> &mut DataSource<T> {
        self.data_source.get_mut()
    }
}
