//! Host bootstrap

use std::sync::Arc;

use flowline_core::{Ecosystem, ExecutionContext, ModuleBridge, Result};
use tracing::info;

use crate::config::RuntimeConfig;
use crate::loader::FsModuleLoader;
use crate::workspace::WorkspaceGuard;

/// Lock the configured workspace and create the execution context for it
///
/// The framework and toolkit modules are resolved through filesystem
/// loaders over `module_paths`. The workspace stays locked for as long as
/// the returned guard lives; on failure it is released before returning.
pub async fn bootstrap(config: &RuntimeConfig) -> Result<(WorkspaceGuard, ExecutionContext)> {
    let guard = WorkspaceGuard::provision(&config.workspace_root).await?;

    let bridge = ModuleBridge::new()
        .with_loader(Arc::new(FsModuleLoader::new(Ecosystem::Js, config.module_paths.js.clone())))
        .with_loader(Arc::new(FsModuleLoader::new(Ecosystem::Py, config.module_paths.py.clone())));
    let ctx = ExecutionContext::create(
        guard.workspace().clone(),
        Arc::new(bridge),
        &config.framework,
        &config.toolkit,
    )
    .await?;

    info!(root = %guard.root().display(), task_type = %config.task_type, "host ready");
    Ok((guard, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::install_default_modules;
    use flowline_core::Error;

    fn config(dir: &std::path::Path) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.workspace_root = dir.join("ws");
        config.module_paths.js = vec![dir.to_path_buf()];
        config.module_paths.py = vec![dir.to_path_buf()];
        config
    }

    #[tokio::test]
    async fn test_bootstrap_resolves_default_modules() {
        let dir = tempfile::tempdir().unwrap();
        install_default_modules(dir.path());

        let (guard, ctx) = bootstrap(&config(dir.path())).await.unwrap();
        assert_eq!(ctx.workspace, *guard.workspace());
        assert!(ctx.workspace.model_dir.is_dir());
        assert_eq!(ctx.framework().location, dir.path().join("flowline_bridge.py"));
        assert_eq!(ctx.toolkit().location, dir.path().join("node_modules/flowline-toolkit"));
    }

    #[tokio::test]
    async fn test_missing_framework_releases_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let err = bootstrap(&config).await.unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound { ecosystem: Ecosystem::Py, .. }));

        install_default_modules(dir.path());
        assert!(bootstrap(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_second_bootstrap_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        install_default_modules(dir.path());
        let config = config(dir.path());

        let _held = bootstrap(&config).await.unwrap();
        assert!(matches!(bootstrap(&config).await, Err(Error::WorkspaceLocked(_))));
    }
}
