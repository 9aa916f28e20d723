//! Pipeline execution
//!
//! A [`PipelineRunner`] maps the script URIs of a [`PipelineMeta`] onto
//! registered Rust implementations and drives them in order: the data source
//! script, every dataflow stage, then the model script when the task type
//! asks for it.

use std::collections::HashMap;
use std::sync::Arc;

use flowline_core::{
    BoxedDataflow, DataSourceEntry, DataflowChain, Error, ExecutionContext, ModelEntry, PipelineMeta,
    ProgressInfo, Result, TaskType,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::local::LocalRuntime;

type StageFactory<T> = Arc<dyn Fn() -> BoxedDataflow<T> + Send + Sync>;

/// Registry of scripts plus the logic that runs a pipeline through them
pub struct PipelineRunner<T: Send + 'static> {
    source_uri: String,
    source: Arc<dyn DataSourceEntry<T>>,
    stages: HashMap<String, StageFactory<T>>,
    models: HashMap<String, Arc<dyn ModelEntry<T>>>,
    task_type: TaskType,
    progress: Option<mpsc::Sender<ProgressInfo>>,
}

impl<T: Send + 'static> PipelineRunner<T> {
    /// Runner loading data through `source`, registered under `uri`
    ///
    /// Runs every script by default; see [`PipelineRunner::task_type`].
    pub fn new(uri: &str, source: impl DataSourceEntry<T> + 'static) -> Self {
        Self {
            source_uri: uri.to_string(),
            source: Arc::new(source),
            stages: HashMap::new(),
            models: HashMap::new(),
            task_type: TaskType::All,
            progress: None,
        }
    }

    /// Register a dataflow stage under `uri`
    ///
    /// The factory is called once per occurrence of `uri` in a pipeline, so
    /// the same stage may appear several times with different options.
    #[must_use]
    pub fn stage<F>(mut self, uri: &str, factory: F) -> Self
    where
        F: Fn() -> BoxedDataflow<T> + Send + Sync + 'static,
    {
        self.stages.insert(uri.to_string(), Arc::new(factory));
        self
    }

    /// Register a model script under `uri`
    #[must_use]
    pub fn model(mut self, uri: &str, model: impl ModelEntry<T> + 'static) -> Self {
        self.models.insert(uri.to_string(), Arc::new(model));
        self
    }

    /// Task type later runs use
    #[must_use]
    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// Forward model progress reports to `sender`
    #[must_use]
    pub fn progress(mut self, sender: mpsc::Sender<ProgressInfo>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Take the task type from `config` and report progress over a channel
    /// holding at most `progress_buffer` reports
    pub fn configure(self, config: &RuntimeConfig) -> (Self, mpsc::Receiver<ProgressInfo>) {
        let (tx, rx) = mpsc::channel(config.progress_buffer.max(1));
        (self.task_type(config.task_type).progress(tx), rx)
    }

    fn chain(&self, pipeline: &PipelineMeta) -> Result<DataflowChain<T>> {
        let mut chain = DataflowChain::new();
        for spec in &pipeline.dataflow {
            let factory = self
                .stages
                .get(&spec.uri)
                .ok_or_else(|| Error::stage(&spec.uri, "no dataflow registered for this uri"))?;
            chain.push(factory(), spec.options.clone());
        }
        Ok(chain)
    }

    /// Run `pipeline` and hand back the runtime the model saw
    ///
    /// Every script URI is resolved before the data source is loaded.
    /// Task types that do not run the model stop after the dataflow; the
    /// returned runtime then holds the processed data source.
    pub async fn run(&self, pipeline: PipelineMeta, ctx: &ExecutionContext) -> Result<LocalRuntime<T>> {
        let task_type = self.task_type;
        info!(pipeline = %pipeline.id, %task_type, stages = pipeline.dataflow.len(), "running pipeline");
        if pipeline.data_source.uri != self.source_uri {
            return Err(Error::stage(
                &pipeline.data_source.uri,
                "no data source registered for this uri",
            ));
        }
        let chain = self.chain(&pipeline)?;
        let model = if task_type.runs_model() {
            let spec = pipeline
                .model
                .clone()
                .ok_or_else(|| Error::stage("model", "pipeline has no model script"))?;
            let entry = self
                .models
                .get(&spec.uri)
                .cloned()
                .ok_or_else(|| Error::stage(&spec.uri, "no model registered for this uri"))?;
            Some((spec, entry))
        } else {
            None
        };

        let source = self.source.load(&pipeline.data_source.options, ctx).await?;
        info!(size = ?source.meta().size(), "data source loaded");
        let source = chain.run(source, ctx).await?;

        let mut runtime = LocalRuntime::new(pipeline, task_type, &ctx.workspace.model_dir, source);
        if let Some(sender) = &self.progress {
            runtime.set_progress_sender(sender.clone());
        }

        match model {
            Some((spec, entry)) => {
                info!(model = %spec.uri, "running model script");
                entry.run(&mut runtime, &spec.options, ctx).await?;
            }
            None if task_type == TaskType::Unknown => warn!("task type unknown, skipping model script"),
            None => info!(%task_type, "skipping model script"),
        }
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::bootstrap;
    use crate::testing::{install_default_modules, pipeline, script};
    use crate::{RuntimeConfig, WorkspaceGuard};
    use async_trait::async_trait;
    use flowline_core::{DataAccessor, ModelSource, Options, Runtime};
    use flowline_readers::{CsvSourceOptions, CsvTableSource, TableRow};
    use flowline_transforms::{CacheStage, LimitStage};
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    /// Counts train rows, reports progress and saves the count as the model
    struct CountingModel;

    #[async_trait]
    impl ModelEntry<TableRow> for CountingModel {
        async fn run(&self, runtime: &mut dyn Runtime<TableRow>, _options: &Options, _ctx: &ExecutionContext) -> Result<()> {
            let mut rows = 0usize;
            let train = &mut runtime.data_source().train;
            train.seek(0).await?;
            while train.next().await?.is_some() {
                rows += 1;
            }
            runtime.notify_progress(ProgressInfo::percent(50.0)?);
            runtime.notify_progress(ProgressInfo::percent(100.0)?);

            let count = rows.to_string().into_bytes();
            runtime.save_model(ModelSource::stream(std::io::Cursor::new(count)), "count.txt").await
        }
    }

    async fn setup() -> (TempDir, WorkspaceGuard, ExecutionContext) {
        setup_with(RuntimeConfig::default()).await
    }

    async fn setup_with(mut config: RuntimeConfig) -> (TempDir, WorkspaceGuard, ExecutionContext) {
        let dir = tempfile::tempdir().unwrap();
        let modules = dir.path().join("modules");
        std::fs::create_dir_all(&modules).unwrap();
        install_default_modules(&modules);

        config.workspace_root = dir.path().join("ws");
        config.module_paths.js = vec![modules.clone()];
        config.module_paths.py = vec![modules];
        let (guard, ctx) = bootstrap(&config).await.unwrap();

        let data = &ctx.workspace.data_dir;
        std::fs::write(data.join("train.csv"), "height,color,label\n1.0,red,yes\n2.0,blue,no\n3.0,red,yes\n4.0,red,no\n").unwrap();
        std::fs::write(data.join("test.csv"), "height,color,label\n5.0,blue,yes\n").unwrap();
        (dir, guard, ctx)
    }

    fn runner() -> PipelineRunner<TableRow> {
        PipelineRunner::new("csv", CsvTableSource::new(CsvSourceOptions::default()))
            .stage("limit", || Box::new(LimitStage))
            .stage("cache", || Box::new(CacheStage))
            .model("count", CountingModel)
    }

    fn csv_pipeline() -> PipelineMeta {
        let mut meta = pipeline("csv-run");
        meta.data_source = script("csv", json!({}));
        meta.dataflow = vec![
            script("limit", json!({"max_train": 3})),
            script("cache", json!({"name": "limited"})),
        ];
        meta.model = Some(script("count", json!({})));
        meta
    }

    async fn model_text(path: PathBuf) -> String {
        let mut text = String::new();
        tokio::fs::File::open(path).await.unwrap().read_to_string(&mut text).await.unwrap();
        text
    }

    #[tokio::test]
    async fn test_full_pipeline_saves_model() {
        let (_dir, _guard, ctx) = setup().await;
        let (tx, mut rx) = mpsc::channel(4);

        let runtime = runner().progress(tx).run(csv_pipeline(), &ctx).await.unwrap();

        assert_eq!(model_text(runtime.read_model().await.unwrap()).await, "3");
        assert_eq!(rx.recv().await.unwrap().progress_value, 50.0);
        assert_eq!(rx.recv().await.unwrap().progress_value, 100.0);
        assert!(ctx.workspace.cache_dir.join("limited/train.rec").is_file());
    }

    #[tokio::test]
    async fn test_data_task_skips_model() {
        let (_dir, _guard, ctx) = setup().await;
        let mut runtime = runner().task_type(TaskType::Data).run(csv_pipeline(), &ctx).await.unwrap();

        assert!(matches!(runtime.read_model().await, Err(Error::ModelNotFound(_))));
        assert_eq!(runtime.data_source().meta().size().train, 3);
    }

    #[tokio::test]
    async fn test_unknown_stage_fails_before_loading() {
        let (_dir, _guard, ctx) = setup().await;
        std::fs::remove_file(ctx.workspace.data_dir.join("train.csv")).unwrap();
        let mut meta = csv_pipeline();
        meta.dataflow.push(script("normalize", json!({})));

        let err = runner().run(meta, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Stage { stage, .. } if stage == "normalize"));
    }

    #[tokio::test]
    async fn test_model_task_needs_model_script() {
        let (_dir, _guard, ctx) = setup().await;
        let mut meta = csv_pipeline();
        meta.model = None;

        let err = runner().task_type(TaskType::Model).run(meta.clone(), &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Stage { stage, .. } if stage == "model"));
        assert!(runner().task_type(TaskType::Data).run(meta, &ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_source_options_come_from_pipeline() {
        let (_dir, _guard, ctx) = setup().await;
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("train.csv"), "x;label\n1;a\n").unwrap();
        std::fs::write(other.path().join("test.csv"), "x;label\n2;b\n").unwrap();

        let mut meta = pipeline("semicolons");
        meta.data_source = script(
            "csv",
            json!({"path": other.path().to_str().unwrap(), "delimiter": ";"}),
        );
        let mut runtime = runner().task_type(TaskType::Data).run(meta, &ctx).await.unwrap();
        let source = runtime.data_source();
        assert_eq!(source.meta().size().train, 1);
        assert_eq!(source.meta().label_map().len(), 2);
    }

    #[tokio::test]
    async fn test_stage_errors_propagate() {
        let (_dir, _guard, ctx) = setup().await;
        let mut meta = csv_pipeline();
        meta.dataflow = vec![script("limit", json!({"max_train": "three"}))];

        let err = runner().task_type(TaskType::Data).run(meta, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOption { .. }));
    }

    #[tokio::test]
    async fn test_configured_task_type_and_progress_buffer() {
        let config = RuntimeConfig {
            task_type: TaskType::Model,
            progress_buffer: 1,
            ..RuntimeConfig::default()
        };
        let (_dir, _guard, ctx) = setup_with(config.clone()).await;

        let (runner, mut rx) = runner().configure(&config);
        let runtime = runner.run(csv_pipeline(), &ctx).await.unwrap();
        assert_eq!(runtime.task_type(), TaskType::Model);

        // Only the first of the two reports fits
        assert_eq!(rx.recv().await.unwrap().progress_value, 50.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregistered_script_uris_are_rejected() {
        let (_dir, _guard, ctx) = setup().await;

        let mut meta = csv_pipeline();
        meta.model = Some(script("forest", json!({})));
        let err = runner().run(meta, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Stage { stage, .. } if stage == "forest"));
        assert!(runner().task_type(TaskType::Data).run(csv_pipeline(), &ctx).await.is_ok());

        let mut meta = csv_pipeline();
        meta.data_source = script("parquet", json!({}));
        let err = runner().task_type(TaskType::Data).run(meta, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Stage { stage, .. } if stage == "parquet"));
    }
}
