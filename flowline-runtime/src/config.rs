//! Host configuration
//!
//! Loaded from a JSON file, then overridden by `FLOWLINE_*` environment
//! variables:
//!
//! | variable | field |
//! |----------|-------|
//! | `FLOWLINE_WORKSPACE` | `workspace_root` |
//! | `FLOWLINE_TASK_TYPE` | `task_type` |
//! | `FLOWLINE_JS_PATH` | `module_paths.js` (path list) |
//! | `FLOWLINE_PY_PATH` | `module_paths.py` (path list) |
//!
//! `FLOWLINE_LOG` is read by [`init_tracing`](crate::init_tracing).

use std::path::{Path, PathBuf};

use flowline_core::{Ecosystem, ModuleSpec, Result, TaskType};
use serde::{Deserialize, Serialize};

/// Directories searched by the filesystem module loaders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulePaths {
    /// JavaScript search roots
    #[serde(default)]
    pub js: Vec<PathBuf>,
    /// Python search roots
    #[serde(default)]
    pub py: Vec<PathBuf>,
}

/// Top-level host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Root under which the workspace directories are created
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Task type the pipeline runs with
    #[serde(default = "default_task_type")]
    pub task_type: TaskType,

    /// Native bridge module resolved when the context is created
    #[serde(default = "default_framework")]
    pub framework: ModuleSpec,

    /// Toolkit module resolved when the context is created
    #[serde(default = "default_toolkit")]
    pub toolkit: ModuleSpec,

    /// Module search roots
    #[serde(default)]
    pub module_paths: ModulePaths,

    /// Progress reports buffered before new ones are dropped
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".flowline")
}

fn default_task_type() -> TaskType {
    TaskType::All
}

fn default_framework() -> ModuleSpec {
    ModuleSpec::new(Ecosystem::Py, "flowline_bridge")
}

fn default_toolkit() -> ModuleSpec {
    ModuleSpec::new(Ecosystem::Js, "flowline-toolkit")
}

fn default_progress_buffer() -> usize {
    64
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            task_type: default_task_type(),
            framework: default_framework(),
            toolkit: default_toolkit(),
            module_paths: ModulePaths::default(),
            progress_buffer: default_progress_buffer(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON file and apply the process environment
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&json)?.with_env_overrides(std::env::vars())
    }

    /// Defaults with the process environment applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(std::env::vars())
    }

    /// Apply `FLOWLINE_*` overrides from the given variables
    pub fn with_env_overrides<I>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "FLOWLINE_WORKSPACE" => self.workspace_root = PathBuf::from(value),
                "FLOWLINE_TASK_TYPE" => self.task_type = value.parse()?,
                "FLOWLINE_JS_PATH" => self.module_paths.js = std::env::split_paths(&value).collect(),
                "FLOWLINE_PY_PATH" => self.module_paths.py = std::env::split_paths(&value).collect(),
                _ => {}
            }
        }
        Ok(self)
    }
}
