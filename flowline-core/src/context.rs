//! Execution context handed to every script
//!
//! The context carries the run's workspace directories and a
//! [`ModuleBridge`], a single capability for loading modules from foreign
//! ecosystems. Each ecosystem is served by a registered [`ModuleLoader`]
//! backend; adding a backend does not change the bridge's interface.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A foreign module ecosystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    /// JavaScript packages
    Js,
    /// Python packages
    Py,
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ecosystem::Js => f.write_str("js"),
            Ecosystem::Py => f.write_str("py"),
        }
    }
}

/// Resolved module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleHandle {
    /// Ecosystem the module belongs to
    pub ecosystem: Ecosystem,

    /// Name it was imported under
    pub name: String,

    /// Where the backend found it
    pub location: PathBuf,

    /// Identity of this load; equal handles come from the same load
    pub id: Uuid,
}

impl ModuleHandle {
    /// Create a handle with a fresh identity
    pub fn new(ecosystem: Ecosystem, name: &str, location: impl Into<PathBuf>) -> Self {
        Self {
            ecosystem,
            name: name.to_string(),
            location: location.into(),
            id: Uuid::new_v4(),
        }
    }
}

/// Reference to a module by ecosystem and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Ecosystem to load from
    pub ecosystem: Ecosystem,
    /// Module name
    pub name: String,
}

impl ModuleSpec {
    /// Create a module reference
    pub fn new(ecosystem: Ecosystem, name: &str) -> Self {
        Self {
            ecosystem,
            name: name.to_string(),
        }
    }
}

/// Backend that locates and loads modules of one ecosystem
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Ecosystem served by this loader
    fn ecosystem(&self) -> Ecosystem;

    /// Load a module by name
    async fn load(&self, name: &str) -> Result<ModuleHandle>;
}

type ModuleKey = (Ecosystem, String);

/// On-demand module loading across ecosystems
///
/// Imports are cached per `(ecosystem, name)`: repeated imports return the
/// same handle, and concurrent first imports share a single load. Failed
/// loads are not cached.
pub struct ModuleBridge {
    loaders: HashMap<Ecosystem, Arc<dyn ModuleLoader>>,
    cache: Mutex<HashMap<ModuleKey, Arc<OnceCell<Arc<ModuleHandle>>>>>,
}

impl ModuleBridge {
    /// Create a bridge with no backends
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Register a backend, replacing any loader for the same ecosystem
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loaders.insert(loader.ecosystem(), loader);
        self
    }

    /// Whether a backend is registered for the ecosystem
    pub fn supports(&self, ecosystem: Ecosystem) -> bool {
        self.loaders.contains_key(&ecosystem)
    }

    /// Import a module
    pub async fn import(&self, ecosystem: Ecosystem, name: &str) -> Result<Arc<ModuleHandle>> {
        let loader = self
            .loaders
            .get(&ecosystem)
            .cloned()
            .ok_or(Error::NoLoader(ecosystem))?;

        let cell = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cache.entry((ecosystem, name.to_string())).or_default())
        };

        let loaded = cell
            .get_or_try_init(|| async {
                debug!(%ecosystem, name, "loading module");
                loader.load(name).await.map(Arc::new)
            })
            .await;
        match loaded {
            Ok(handle) => Ok(Arc::clone(handle)),
            Err(e) => {
                self.forget(&(ecosystem, name.to_string()), &cell);
                Err(e)
            }
        }
    }

    /// Drop an empty cache slot left behind by a failed load
    fn forget(&self, key: &ModuleKey, cell: &Arc<OnceCell<Arc<ModuleHandle>>>) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let stale = cache
            .get(key)
            .is_some_and(|cached| Arc::ptr_eq(cached, cell) && !cached.initialized());
        if stale {
            cache.remove(key);
        }
    }

    /// Number of modules loaded so far
    pub fn loaded_count(&self) -> usize {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.values().filter(|cell| cell.initialized()).count()
    }
}

impl Default for ModuleBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// The three directories owned by one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Dataset directory
    pub data_dir: PathBuf,

    /// Cache directory
    pub cache_dir: PathBuf,

    /// Model directory
    pub model_dir: PathBuf,
}

impl Workspace {
    /// Standard layout under a root directory
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            model_dir: root.join("model"),
        }
    }

    /// Create the directories if they do not exist
    pub async fn ensure(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.cache_dir, &self.model_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

/// Environment supplied to every script invocation
#[derive(Clone)]
pub struct ExecutionContext {
    /// Directories of this run
    pub workspace: Workspace,

    bridge: Arc<ModuleBridge>,
    framework: Arc<ModuleHandle>,
    toolkit: Arc<ModuleHandle>,
}

impl ExecutionContext {
    /// Create a context, resolving the framework and toolkit modules eagerly
    pub async fn create(
        workspace: Workspace,
        bridge: Arc<ModuleBridge>,
        framework: &ModuleSpec,
        toolkit: &ModuleSpec,
    ) -> Result<Self> {
        workspace.ensure().await?;
        let framework = bridge.import(framework.ecosystem, &framework.name).await?;
        let toolkit = bridge.import(toolkit.ecosystem, &toolkit.name).await?;
        info!(
            framework = %framework.name,
            toolkit = %toolkit.name,
            data_dir = %workspace.data_dir.display(),
            "execution context ready"
        );

        Ok(Self {
            workspace,
            bridge,
            framework,
            toolkit,
        })
    }

    /// Native bridge module, ready to use
    pub fn framework(&self) -> &Arc<ModuleHandle> {
        &self.framework
    }

    /// Data-science toolkit module, ready to use
    pub fn toolkit(&self) -> &Arc<ModuleHandle> {
        &self.toolkit
    }

    /// Import a JavaScript module
    pub async fn import_js(&self, name: &str) -> Result<Arc<ModuleHandle>> {
        self.bridge.import(Ecosystem::Js, name).await
    }

    /// Import a Python module
    pub async fn import_py(&self, name: &str) -> Result<Arc<ModuleHandle>> {
        self.bridge.import(Ecosystem::Py, name).await
    }

    /// The underlying bridge
    pub fn bridge(&self) -> &Arc<ModuleBridge> {
        &self.bridge
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("workspace", &self.workspace)
            .field("framework", &self.framework.name)
            .field("toolkit", &self.toolkit.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loader that knows a fixed set of names and counts loads
    pub(crate) struct FixedLoader {
        ecosystem: Ecosystem,
        known: HashSet<String>,
        loads: AtomicUsize,
    }

    impl FixedLoader {
        pub(crate) fn new(ecosystem: Ecosystem, known: &[&str]) -> Self {
            Self {
                ecosystem,
                known: known.iter().map(|s| s.to_string()).collect(),
                loads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModuleLoader for FixedLoader {
        fn ecosystem(&self) -> Ecosystem {
            self.ecosystem
        }

        async fn load(&self, name: &str) -> Result<ModuleHandle> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.known.contains(name) {
                Ok(ModuleHandle::new(self.ecosystem, name, format!("/mods/{name}")))
            } else {
                Err(Error::ModuleNotFound {
                    ecosystem: self.ecosystem,
                    name: name.to_string(),
                })
            }
        }
    }

    pub(crate) fn test_bridge() -> ModuleBridge {
        ModuleBridge::new()
            .with_loader(Arc::new(FixedLoader::new(Ecosystem::Js, &["toolkit", "lodash"])))
            .with_loader(Arc::new(FixedLoader::new(Ecosystem::Py, &["bridge", "numpy"])))
    }

    pub(crate) async fn test_context() -> (tempfile::TempDir, ExecutionContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::create(
            Workspace::under(dir.path()),
            Arc::new(test_bridge()),
            &ModuleSpec::new(Ecosystem::Py, "bridge"),
            &ModuleSpec::new(Ecosystem::Js, "toolkit"),
        )
        .await
        .unwrap();
        (dir, ctx)
    }

    #[tokio::test]
    async fn test_context_creates_workspace() {
        let (_dir, ctx) = test_context().await;
        assert!(ctx.workspace.data_dir.is_dir());
        assert!(ctx.workspace.cache_dir.is_dir());
        assert!(ctx.workspace.model_dir.is_dir());
        assert_eq!(ctx.framework().name, "bridge");
        assert_eq!(ctx.toolkit().ecosystem, Ecosystem::Js);
    }

    #[tokio::test]
    async fn test_imports_are_idempotent() {
        let (_dir, ctx) = test_context().await;
        let a = ctx.import_py("numpy").await.unwrap();
        let b = ctx.import_py("numpy").await.unwrap();
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a, &b));

        // framework handle was cached at creation
        let bridge = ctx.import_py("bridge").await.unwrap();
        assert_eq!(bridge.id, ctx.framework().id);
    }

    #[tokio::test]
    async fn test_concurrent_imports_share_one_load() {
        let loader = Arc::new(FixedLoader::new(Ecosystem::Js, &["lodash"]));
        let bridge = ModuleBridge::new().with_loader(loader.clone());

        let (a, b) = tokio::join!(
            bridge.import(Ecosystem::Js, "lodash"),
            bridge.import(Ecosystem::Js, "lodash")
        );
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.loaded_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_import_is_not_cached() {
        let loader = Arc::new(FixedLoader::new(Ecosystem::Js, &[]));
        let bridge = ModuleBridge::new().with_loader(loader.clone());

        for _ in 0..2 {
            let err = bridge.import(Ecosystem::Js, "missing").await.unwrap_err();
            assert!(matches!(err, Error::ModuleNotFound { .. }));
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(bridge.loaded_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_imports_leave_no_cache_slots() {
        let bridge = ModuleBridge::new().with_loader(Arc::new(FixedLoader::new(Ecosystem::Js, &["lodash"])));

        for name in ["a", "b", "c"] {
            assert!(bridge.import(Ecosystem::Js, name).await.is_err());
        }
        assert!(bridge.cache.lock().unwrap().is_empty());

        bridge.import(Ecosystem::Js, "lodash").await.unwrap();
        assert_eq!(bridge.cache.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_name_in_two_ecosystems() {
        let bridge = ModuleBridge::new()
            .with_loader(Arc::new(FixedLoader::new(Ecosystem::Js, &["x"])))
            .with_loader(Arc::new(FixedLoader::new(Ecosystem::Py, &["x"])));
        let js = bridge.import(Ecosystem::Js, "x").await.unwrap();
        let py = bridge.import(Ecosystem::Py, "x").await.unwrap();
        assert_ne!(js.id, py.id);
    }

    #[tokio::test]
    async fn test_missing_backend() {
        let bridge = ModuleBridge::new();
        assert!(!bridge.supports(Ecosystem::Py));
        let err = bridge.import(Ecosystem::Py, "numpy").await.unwrap_err();
        assert!(matches!(err, Error::NoLoader(Ecosystem::Py)));
    }
}
