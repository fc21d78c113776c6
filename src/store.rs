use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use directories::UserDirs;
use serde::Serialize;
use tempfile::{Builder, TempDir};

use crate::error::LandsatError;

/// Local layout of downloaded scenes: one directory per display id, plus a
/// transient `<display_id>.tar` while a download is in flight.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<downloads>/landsat`, or `./landsat` when the platform has no
    /// download directory.
    pub fn default_root() -> Utf8PathBuf {
        UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(|dir| dir.join("landsat")))
            .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
            .unwrap_or_else(|| Utf8PathBuf::from("landsat"))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn item_dir(&self, display_id: &str) -> Utf8PathBuf {
        self.root.join(display_id)
    }

    pub fn archive_path(&self, display_id: &str) -> Utf8PathBuf {
        self.root.join(format!("{display_id}.tar"))
    }

    /// Presence of a directory or file named after the scene.
    pub fn contains(&self, display_id: &str) -> bool {
        self.item_dir(display_id).as_std_path().exists()
    }

    pub fn ensure_root(&self) -> Result<(), LandsatError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| LandsatError::Filesystem(err.to_string()))
    }

    /// Removes a leftover archive from an aborted run. Returns whether one existed.
    pub fn remove_stale_archive(&self, display_id: &str) -> Result<bool, LandsatError> {
        let path = self.archive_path(display_id);
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => {
                tracing::debug!(path = %path, "removed stale archive");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(LandsatError::Filesystem(format!("remove {path}: {err}"))),
        }
    }

    /// Scratch directory inside the store, so the final rename stays on one
    /// filesystem.
    pub fn staging_dir(&self, display_id: &str) -> Result<TempDir, LandsatError> {
        self.ensure_root()?;
        Builder::new()
            .prefix(&format!(".{display_id}-"))
            .tempdir_in(self.root.as_std_path())
            .map_err(|err| LandsatError::Filesystem(err.to_string()))
    }

    /// Moves a fully populated staging directory into place as the item directory.
    pub fn commit_item(&self, staging: TempDir, display_id: &str) -> Result<Utf8PathBuf, LandsatError> {
        let dest = self.item_dir(display_id);
        // On failure `staging` is dropped here and cleans up after itself.
        atomic_rename_dir(staging.path(), dest.as_std_path())
            .map_err(|err| LandsatError::Filesystem(format!("move into {dest}: {err}")))?;
        let _ = staging.keep();
        Ok(dest)
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), LandsatError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| LandsatError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| LandsatError::Filesystem(err.to_string()))?;
        fs::write(tmp_path.as_std_path(), &content)
            .map_err(|err| LandsatError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| LandsatError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}
