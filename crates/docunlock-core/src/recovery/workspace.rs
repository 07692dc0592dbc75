/// Scoped temporary copies for recovery attempts
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::{NamedTempFile, TempDir};

use crate::error::WorkspaceError;

/// Name prefix of every workspace directory, used by the stale sweep.
pub const WORKSPACE_PREFIX: &str = "docunlock-ws-";

const STDERR_FILE_NAME: &str = ".program-stderr.log";

/// A private directory holding one copy of the target file.
///
/// The directory is deleted when the workspace is dropped, so every exit
/// path (error, timeout, panic unwinding) releases it. [`close`] does the
/// same but reports removal failures.
///
/// [`close`]: TempWorkspace::close
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
    file: PathBuf,
}

impl TempWorkspace {
    /// Copy `original` into a fresh directory under `root` (system temp
    /// dir when `None`). The copy keeps the original file name because
    /// document programs pick their importer from the extension.
    pub fn create(original: &Path, root: Option<&Path>) -> Result<Self, WorkspaceError> {
        let root = root
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);

        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&root)
            .map_err(|source| WorkspaceError::Create {
                root: root.clone(),
                source,
            })?;

        let name = original
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "document".into());
        let file = dir.path().join(name);

        fs::copy(original, &file).map_err(|source| WorkspaceError::Copy {
            path: original.to_path_buf(),
            source,
        })?;

        Ok(Self { dir, file })
    }

    /// The copy handed to the external program
    pub fn file_path(&self) -> &Path {
        &self.file
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Where the external program's stderr is captured
    pub fn stderr_path(&self) -> PathBuf {
        self.dir.path().join(STDERR_FILE_NAME)
    }

    /// Copy the workspace file to `target` atomically: the bytes go to a
    /// temp file in the target's directory, then a rename puts it in place.
    /// A failure at any step leaves `target` as it was.
    ///
    /// With `overwrite == false` an existing `target` is never replaced.
    pub fn promote(&self, target: &Path, overwrite: bool) -> Result<(), WorkspaceError> {
        let promote_err = |source| WorkspaceError::Promote {
            target: target.to_path_buf(),
            source,
        };

        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut staged = NamedTempFile::new_in(parent).map_err(promote_err)?;
        let mut source = File::open(&self.file).map_err(promote_err)?;
        io::copy(&mut source, staged.as_file_mut()).map_err(promote_err)?;
        staged.as_file().sync_all().map_err(promote_err)?;

        if let Ok(meta) = fs::metadata(target) {
            // Keep the permissions of the file being replaced.
            if let Err(e) = staged.as_file().set_permissions(meta.permissions()) {
                tracing::warn!("could not copy permissions to {}: {}", target.display(), e);
            }
        }

        let persisted = if overwrite {
            staged.persist(target)
        } else {
            staged.persist_noclobber(target)
        };
        persisted.map_err(|e| promote_err(e.error))?;
        Ok(())
    }

    /// Remove the workspace now, reporting failures.
    pub fn close(self) -> Result<(), WorkspaceError> {
        let dir = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|source| WorkspaceError::Cleanup { dir, source })
    }

    /// Delete workspaces left behind by a process that died mid-attempt.
    /// Only directories named with [`WORKSPACE_PREFIX`] and older than
    /// `max_age` are touched. Returns how many were removed.
    pub fn sweep_stale(root: &Path, max_age: Duration) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(WORKSPACE_PREFIX) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) if m.is_dir() => m,
                _ => continue,
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            match fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    tracing::info!("removed stale workspace {}", entry.path().display());
                    removed += 1;
                }
                Err(e) => tracing::warn!(
                    "failed to remove stale workspace {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }

        Ok(removed)
    }
}

/// `<stem><suffix>.<ext>` next to `original`, numbered until the name is free.
pub fn alongside_path(original: &Path, suffix: &str) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let ext = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = original.parent().unwrap_or_else(|| Path::new(""));

    let mut candidate = parent.join(format!("{}{}{}", stem, suffix, ext));
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{}{}_{}{}", stem, suffix, n, ext));
        n += 1;
    }
    candidate
}
