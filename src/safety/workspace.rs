/// Scoped workspaces for one-shot filesystem staging
///
/// A workspace is a uniquely named directory that owns every file written into
/// it and is removed exactly once, on the first exit from its scope.
use crate::config::types::{Result, SandboxError};
use crate::safety::safe_cleanup;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Ephemeral directory removed when dropped or explicitly closed
#[derive(Debug)]
pub struct ScopedWorkspace {
    path: PathBuf,
    removed: bool,
}

impl ScopedWorkspace {
    /// Create a uniquely named directory (mode 0700) under `root_prefix`
    pub fn create(root_prefix: &Path) -> Result<Self> {
        fs::create_dir_all(root_prefix).map_err(|e| {
            SandboxError::Workspace(format!(
                "failed to create workspace root {}: {}",
                root_prefix.display(),
                e
            ))
        })?;

        let path = root_prefix.join(format!("codebox-{}", Uuid::new_v4().simple()));
        fs::create_dir(&path).map_err(|e| {
            SandboxError::Workspace(format!(
                "failed to create workspace {}: {}",
                path.display(),
                e
            ))
        })?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).map_err(|e| {
            // Creation succeeded; do not leak the directory on the error path.
            let _ = fs::remove_dir(&path);
            SandboxError::Workspace(format!(
                "failed to restrict workspace {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy an existing file or directory tree into the workspace root
    pub fn stage(&self, source: &Path) -> Result<PathBuf> {
        let name = source.file_name().ok_or_else(|| {
            SandboxError::Workspace(format!("cannot stage path without name: {}", source.display()))
        })?;
        let target = self.path.join(name);
        copy_tree(source, &target).map_err(|e| {
            SandboxError::Workspace(format!(
                "failed to stage {} into workspace: {}",
                source.display(),
                e
            ))
        })?;
        Ok(target)
    }

    /// Remove the workspace now. Failures are logged, never returned.
    pub fn close(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        if let Err(e) = safe_cleanup::remove_tree_secure(&self.path) {
            log::warn!("Failed to remove workspace {}: {}", self.path.display(), e);
        }
    }
}

impl Drop for ScopedWorkspace {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Run `body` inside a fresh workspace under `root_prefix`.
///
/// `extra_paths` are copied into the workspace before `body` runs. The
/// directory is removed before returning whatever `body` returned; a cleanup
/// failure is logged so that it never masks the body's own error.
pub fn with_temp_dir<T, F>(root_prefix: &Path, extra_paths: &[PathBuf], body: F) -> Result<T>
where
    F: FnOnce(&Path) -> Result<T>,
{
    let workspace = ScopedWorkspace::create(root_prefix)?;
    for extra in extra_paths {
        workspace.stage(extra)?;
    }
    let outcome = body(workspace.path());
    workspace.close();
    outcome
}

fn copy_tree(source: &Path, target: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(source)?;
    if meta.file_type().is_symlink() {
        let link = fs::read_link(source)?;
        std::os::unix::fs::symlink(link, target)
    } else if meta.is_dir() {
        fs::create_dir_all(target)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_tree(&entry.path(), &target.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(source, target).map(|_| ())
    }
}
