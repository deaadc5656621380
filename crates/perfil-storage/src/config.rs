//! Store configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::account::DEFAULT_THEME;
use crate::avatar::AvatarUploader;
use crate::error::{Result, StoreError};

/// Default upload ceiling for avatar images (4 MiB).
pub const DEFAULT_MAX_AVATAR_BYTES: u64 = 4 * 1024 * 1024;

/// Configuration for an [`AccountStore`](crate::AccountStore) and its upload
/// handler. Every field has a default, so a config file only needs to name
/// what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The accounts document.
    pub document_path: PathBuf,
    /// Directory the upload handler writes avatar images into.
    pub avatar_dir: PathBuf,
    pub max_avatar_bytes: u64,
    /// Theme given to new and migrated accounts.
    pub default_theme: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            document_path: PathBuf::from("usuarios.json"),
            avatar_dir: PathBuf::from("static/uploads"),
            max_avatar_bytes: DEFAULT_MAX_AVATAR_BYTES,
            default_theme: DEFAULT_THEME.to_string(),
        }
    }
}

impl StoreConfig {
    /// Read a JSON config file. Unparsable contents are `InvalidInput`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|err| StoreError::storage(path, err))?;
        serde_json::from_str(&contents).map_err(|err| {
            StoreError::InvalidInput(format!("config {}: {err}", path.display()))
        })
    }

    pub fn uploader(&self) -> AvatarUploader {
        AvatarUploader::new(self.avatar_dir.clone(), self.max_avatar_bytes)
    }
}
