//! Fixtures shared by the runtime tests

use std::path::Path;

use flowline_core::{
    DataSource, DataSourceMeta, DataSourceSize, ImageDataSourceMeta, ImageDimension, LabelMap,
    Options, PipelineMeta, Sample, ScriptSpec,
};
use flowline_readers::memory_source;

/// Image-typed source whose payload is the sample's position
pub(crate) fn image_source(train: usize, test: usize) -> DataSource<u32> {
    let split = |n: usize| -> Vec<Sample<u32>> {
        (0..n as u32).map(|i| Sample::new(i % 2, i)).collect()
    };
    let meta = DataSourceMeta::Image(ImageDataSourceMeta {
        size: DataSourceSize::new(0, 0),
        dimension: ImageDimension::new(1, 1, 1),
        label_map: LabelMap::from_names(["cat", "dog"]),
    });
    memory_source(meta, split(train), split(test), None).unwrap()
}

pub(crate) fn script(uri: &str, options: serde_json::Value) -> ScriptSpec {
    ScriptSpec {
        uri: uri.to_string(),
        options: options.as_object().cloned().unwrap_or_default(),
    }
}

/// Pipeline with a data source script and nothing else
pub(crate) fn pipeline(id: &str) -> PipelineMeta {
    PipelineMeta {
        id: id.to_string(),
        name: None,
        data_source: script("memory", serde_json::Value::Null),
        dataflow: Vec::new(),
        model: None,
        options: Options::new(),
    }
}

/// Lay out the default framework and toolkit modules under `dir`
pub(crate) fn install_default_modules(dir: &Path) {
    std::fs::write(dir.join("flowline_bridge.py"), "").unwrap();
    let toolkit = dir.join("node_modules/flowline-toolkit");
    std::fs::create_dir_all(&toolkit).unwrap();
    std::fs::write(toolkit.join("package.json"), r#"{"name": "flowline-toolkit"}"#).unwrap();
}
