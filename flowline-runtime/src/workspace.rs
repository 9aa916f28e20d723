//! Exclusive workspace provisioning

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use flowline_core::{Error, Result, Workspace};
use tracing::{debug, warn};

const LOCK_FILE: &str = ".lock";

/// A workspace owned by this process until dropped
///
/// Provisioning creates the data, cache and model directories under a root
/// and takes a lock file there holding the owner's process id. A second
/// provision of the same root fails with [`Error::WorkspaceLocked`] until the
/// first guard is dropped. A lock whose owner no longer runs is replaced; on
/// platforms other than Linux liveness is not checked and such a lock has to
/// be removed by hand.
#[derive(Debug)]
pub struct WorkspaceGuard {
    root: PathBuf,
    workspace: Workspace,
}

impl WorkspaceGuard {
    /// Create the directories under `root` and lock it
    pub async fn provision(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let workspace = Workspace::under(&root);
        workspace.ensure().await?;

        let lock_path = root.join(LOCK_FILE);
        let pid = std::process::id();
        let created = tokio::task::spawn_blocking(move || take_lock(&lock_path, pid))
            .await
            .map_err(|e| Error::Io(std::io::Error::new(ErrorKind::Other, e)))?;

        match created {
            Ok(stale) => {
                if let Some(owner) = stale {
                    warn!(root = %root.display(), owner, "replaced lock left by a dead process");
                }
                debug!(root = %root.display(), "workspace locked");
                Ok(Self { root, workspace })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(Error::WorkspaceLocked(root)),
            Err(e) => Err(e.into()),
        }
    }

    /// The directories of this workspace
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn create_lock(path: &Path, pid: u32) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    writeln!(file, "{pid}")
}

/// Create the lock file, taking over one whose owner has exited
///
/// Returns the id of the replaced owner, if any.
fn take_lock(path: &Path, pid: u32) -> std::io::Result<Option<u32>> {
    match create_lock(path, pid) {
        Ok(()) => Ok(None),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let owner = match lock_owner(path) {
                Some(owner) if !process_alive(owner) => owner,
                _ => return Err(e),
            };
            if let Err(removed) = std::fs::remove_file(path) {
                if removed.kind() != ErrorKind::NotFound {
                    return Err(removed);
                }
            }
            create_lock(path, pid)?;
            Ok(Some(owner))
        }
        Err(e) => Err(e),
    }
}

/// Process id recorded in a lock file; unreadable locks have no owner
fn lock_owner(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(self.root.join(LOCK_FILE)) {
            warn!(root = %self.root.display(), error = %e, "failed to release workspace lock");
        }
    }
}
