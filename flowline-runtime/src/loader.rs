//! Filesystem module loaders
//!
//! JavaScript modules resolve to `<root>/node_modules/<name>/package.json`
//! (the package directory) or `<root>/<name>.js`. Python modules resolve to
//! `<root>/<pkg>/<mod>/__init__.py` (the package directory) or
//! `<root>/<pkg>/<mod>.py`, with dots in the name separating directories.
//! Roots are searched in order and the first match wins.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use flowline_core::{Ecosystem, Error, ModuleHandle, ModuleLoader, Result};
use tracing::debug;

/// Module loader searching a list of directories
#[derive(Debug, Clone)]
pub struct FsModuleLoader {
    ecosystem: Ecosystem,
    roots: Vec<PathBuf>,
}

impl FsModuleLoader {
    /// Loader for `ecosystem` searching `roots` in order
    pub fn new(ecosystem: Ecosystem, roots: Vec<PathBuf>) -> Self {
        Self { ecosystem, roots }
    }

    fn load_error(&self, name: &str, reason: impl Into<String>) -> Error {
        Error::ModuleLoad {
            ecosystem: self.ecosystem,
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Relative path segments of a module name
    fn segments(&self, name: &str) -> Result<PathBuf> {
        let relative = match self.ecosystem {
            // Scoped packages such as `@scope/pkg` keep their slash
            Ecosystem::Js => PathBuf::from(name),
            Ecosystem::Py => name.split('.').collect(),
        };

        let valid = !name.is_empty()
            && relative.components().count() > 0
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(part) if !part.is_empty()))
            && !(self.ecosystem == Ecosystem::Py && name.split('.').any(str::is_empty));
        if valid {
            Ok(relative)
        } else {
            Err(self.load_error(name, "invalid module name"))
        }
    }

    async fn resolve_js(&self, root: &Path, name: &str, relative: &Path) -> Result<Option<PathBuf>> {
        let package_dir = root.join("node_modules").join(relative);
        let manifest = package_dir.join("package.json");
        if is_file(&manifest).await {
            let bytes = tokio::fs::read(&manifest).await?;
            serde_json::from_slice::<serde_json::Value>(&bytes)
                .map_err(|e| self.load_error(name, format!("{}: {e}", manifest.display())))?;
            return Ok(Some(package_dir));
        }

        let script = with_suffix(&root.join(relative), ".js");
        Ok(is_file(&script).await.then_some(script))
    }

    async fn resolve_py(&self, root: &Path, relative: &Path) -> Option<PathBuf> {
        let package_dir = root.join(relative);
        if is_file(&package_dir.join("__init__.py")).await {
            return Some(package_dir);
        }

        let module = with_suffix(&package_dir, ".py");
        is_file(&module).await.then_some(module)
    }
}

/// Append a suffix without replacing an existing extension
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[async_trait]
impl ModuleLoader for FsModuleLoader {
    fn ecosystem(&self) -> Ecosystem {
        self.ecosystem
    }

    async fn load(&self, name: &str) -> Result<ModuleHandle> {
        let relative = self.segments(name)?;
        for root in &self.roots {
            let found = match self.ecosystem {
                Ecosystem::Js => self.resolve_js(root, name, &relative).await?,
                Ecosystem::Py => self.resolve_py(root, &relative).await,
            };
            if let Some(location) = found {
                debug!(ecosystem = %self.ecosystem, name, location = %location.display(), "resolved module");
                return Ok(ModuleHandle::new(self.ecosystem, name, location));
            }
        }

        Err(Error::ModuleNotFound {
            ecosystem: self.ecosystem,
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use test_case::test_case;

    fn touch(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn test_js_package_and_script() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("node_modules/lodash/package.json"), r#"{"name": "lodash"}"#);
        touch(&dir.path().join("node_modules/@tf/core/package.json"), "{}");
        touch(&dir.path().join("helpers.js"), "module.exports = {}");
        let loader = FsModuleLoader::new(Ecosystem::Js, vec![dir.path().to_path_buf()]);

        let lodash = loader.load("lodash").await.unwrap();
        assert_eq!(lodash.location, dir.path().join("node_modules/lodash"));
        assert!(loader.load("@tf/core").await.is_ok());
        assert_eq!(loader.load("helpers").await.unwrap().location, dir.path().join("helpers.js"));
    }

    #[tokio::test]
    async fn test_py_dotted_names() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("numpy/__init__.py"), "");
        touch(&dir.path().join("sklearn/metrics.py"), "");
        let loader = FsModuleLoader::new(Ecosystem::Py, vec![dir.path().to_path_buf()]);

        assert_eq!(loader.load("numpy").await.unwrap().location, dir.path().join("numpy"));
        assert_eq!(
            loader.load("sklearn.metrics").await.unwrap().location,
            dir.path().join("sklearn/metrics.py")
        );
    }

    #[tokio::test]
    async fn test_roots_searched_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(&second.path().join("util.py"), "");
        touch(&first.path().join("util.py"), "");
        let loader = FsModuleLoader::new(
            Ecosystem::Py,
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
        );
        assert_eq!(loader.load("util").await.unwrap().location, first.path().join("util.py"));
    }

    #[tokio::test]
    async fn test_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FsModuleLoader::new(Ecosystem::Js, vec![dir.path().to_path_buf()]);
        assert!(matches!(
            loader.load("left-pad").await,
            Err(Error::ModuleNotFound { ecosystem: Ecosystem::Js, .. })
        ));
    }

    #[tokio::test]
    async fn test_broken_manifest_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("node_modules/broken/package.json"), "{ not json");
        let loader = FsModuleLoader::new(Ecosystem::Js, vec![dir.path().to_path_buf()]);
        assert!(matches!(loader.load("broken").await, Err(Error::ModuleLoad { .. })));
    }

    #[test_case(Ecosystem::Py, "" ; "empty")]
    #[test_case(Ecosystem::Py, "a..b" ; "empty py segment")]
    #[test_case(Ecosystem::Js, "../escape" ; "parent dir")]
    #[test_case(Ecosystem::Js, "/etc/passwd" ; "absolute")]
    fn test_invalid_names(ecosystem: Ecosystem, name: &str) {
        let loader = FsModuleLoader::new(ecosystem, Vec::new());
        assert!(matches!(loader.segments(name), Err(Error::ModuleLoad { .. })));
    }
}
