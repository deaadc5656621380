//! Crash-safe persistence of a single serde document.
//!
//! Every save rewrites the whole file: the value is serialized into a
//! temporary file next to the target, flushed to disk, then renamed over the
//! target. A reader (or a process restarted after a crash) sees either the
//! previous version or the new one, never a mix.

use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

/// A structured value stored as one JSON file.
#[derive(Debug, Clone)]
pub struct PersistentDocument<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PersistentDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the saved value, or `T::default()` when nothing was saved yet.
    pub fn load(&self) -> Result<T> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "document absent, starting empty");
                return Ok(T::default());
            }
            Err(err) => return Err(StoreError::storage(&self.path, err)),
        };
        serde_json::from_slice(&bytes).map_err(|err| StoreError::corrupt(&self.path, err))
    }

    /// Replace the file contents with `value`.
    pub fn save(&self, value: &T) -> Result<()> {
        self.stage(value)?.commit()
    }

    /// First half of [`save`](Self::save): write `value` to a temporary file
    /// beside the target without touching the target itself.
    pub fn stage(&self, value: &T) -> Result<StagedWrite> {
        let bytes = to_pretty_json(value).map_err(|err| {
            StoreError::storage(
                &self.path,
                io::Error::new(io::ErrorKind::InvalidData, err),
            )
        })?;
        stage_bytes(&self.path, &bytes)
    }
}

/// Write `bytes` to a fresh temporary file in `target`'s directory, creating
/// the directory if needed.
pub(crate) fn stage_bytes(target: &Path, bytes: &[u8]) -> Result<StagedWrite> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|err| StoreError::storage(&dir, err))?;

    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    // From here on the guard owns the temp file and removes it on failure.
    let staged = StagedWrite {
        tmp,
        target: target.to_path_buf(),
        committed: false,
    };
    write_synced(&staged.tmp, bytes).map_err(|err| StoreError::storage(&staged.tmp, err))?;
    Ok(staged)
}

/// A fully written temporary file waiting to be renamed over its target.
///
/// Dropping it without calling [`commit`](Self::commit) discards the
/// temporary file and leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.tmp
    }

    /// Atomically replace the target with the staged contents.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.target)
            .map_err(|err| StoreError::storage(&self.target, err))?;
        self.committed = true;
        sync_parent_dir(&self.target);
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Pretty JSON with a 4-space indent and raw UTF-8, the layout of existing
/// `usuarios.json` files.
fn to_pretty_json<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_parent_dir(target: &Path) {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_target: &Path) {}
