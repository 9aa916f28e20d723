//! Fixtures shared by the stage tests

use std::sync::Arc;

use async_trait::async_trait;
use flowline_core::{
    DataSource, DataSourceMeta, DataSourceSize, Ecosystem, ExecutionContext, ImageDataSourceMeta,
    ImageDimension, LabelMap, ModuleBridge, ModuleHandle, ModuleLoader, ModuleSpec, Result, Sample,
    Workspace,
};
use flowline_readers::memory_source;
use tempfile::TempDir;

struct VirtualLoader(Ecosystem);

#[async_trait]
impl ModuleLoader for VirtualLoader {
    fn ecosystem(&self) -> Ecosystem {
        self.0
    }

    async fn load(&self, name: &str) -> Result<ModuleHandle> {
        Ok(ModuleHandle::new(self.0, name, format!("/virtual/{name}")))
    }
}

pub(crate) async fn context() -> (TempDir, ExecutionContext) {
    let dir = tempfile::tempdir().unwrap();
    let bridge = ModuleBridge::new()
        .with_loader(Arc::new(VirtualLoader(Ecosystem::Js)))
        .with_loader(Arc::new(VirtualLoader(Ecosystem::Py)));
    let ctx = ExecutionContext::create(
        Workspace::under(dir.path()),
        Arc::new(bridge),
        &ModuleSpec::new(Ecosystem::Py, "bridge"),
        &ModuleSpec::new(Ecosystem::Js, "toolkit"),
    )
    .await
    .unwrap();
    (dir, ctx)
}

/// Image-typed source whose payload is the sample's original position
pub(crate) fn numbered(train: usize, test: usize, validation: Option<usize>) -> DataSource<u32> {
    let split = |n: usize| -> Vec<Sample<u32>> {
        (0..n as u32).map(|i| Sample::new(i % 3, i)).collect()
    };
    let meta = DataSourceMeta::Image(ImageDataSourceMeta {
        size: DataSourceSize::new(0, 0),
        dimension: ImageDimension::new(1, 1, 1),
        label_map: LabelMap::from_names(["a", "b", "c"]),
    });
    memory_source(meta, split(train), split(test), validation.map(split)).unwrap()
}
