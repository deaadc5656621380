//! Avatar references and the upload handler that produces them.
//!
//! The store itself only records a filename. [`AvatarUploader`] is the piece
//! that owns image bytes: it sanitizes the client-supplied name, writes the
//! file into the asset directory under the name the store will record, and
//! then records it.

use std::fs;
use std::path::{Path, PathBuf};

use crate::document::stage_bytes;
use crate::error::{Result, StoreError};
use crate::AccountStore;

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

const WINDOWS_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// True if the text after the last `.` is an accepted image extension,
/// ignoring case.
pub fn is_allowed_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// The name an avatar is stored and referenced under.
pub fn stored_name(username: &str, timestamp: i64, filename: &str) -> String {
    format!("{username}_{timestamp}_{filename}")
}

/// Base letter of an accented Latin letter, if it has one.
fn fold_accent(c: char) -> Option<char> {
    let base = match c {
        'À'..='Å' | 'Ā' | 'Ă' | 'Ą' => 'A',
        'à'..='å' | 'ā' | 'ă' | 'ą' => 'a',
        'Ç' | 'Ć' | 'Č' => 'C',
        'ç' | 'ć' | 'č' => 'c',
        'Ď' => 'D',
        'ď' => 'd',
        'È'..='Ë' | 'Ē' | 'Ė' | 'Ę' | 'Ě' => 'E',
        'è'..='ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'Ğ' => 'G',
        'ğ' => 'g',
        'Ì'..='Ï' | 'Ī' | 'İ' => 'I',
        'ì'..='ï' | 'ī' => 'i',
        'Ñ' | 'Ń' | 'Ň' => 'N',
        'ñ' | 'ń' | 'ň' => 'n',
        'Ò'..='Ö' | 'Ō' | 'Ő' => 'O',
        'ò'..='ö' | 'ō' | 'ő' => 'o',
        'Ř' => 'R',
        'ř' => 'r',
        'Ś' | 'Ş' | 'Š' => 'S',
        'ś' | 'ş' | 'š' => 's',
        'Ť' => 'T',
        'ť' => 't',
        'Ù'..='Ü' | 'Ū' | 'Ů' | 'Ű' => 'U',
        'ù'..='ü' | 'ū' | 'ů' | 'ű' => 'u',
        'Ý' | 'Ÿ' => 'Y',
        'ý' | 'ÿ' => 'y',
        'Ź' | 'Ż' | 'Ž' => 'Z',
        'ź' | 'ż' | 'ž' => 'z',
        _ => return None,
    };
    Some(base)
}

/// Reduce an untrusted upload name to a flat, portable filename.
///
/// Accented Latin letters lose their accent and other non-ASCII characters
/// are dropped. Path separators and whitespace become `_`, anything outside
/// `[A-Za-z0-9_.-]` is removed, then leading/trailing dots and underscores
/// are trimmed. Returns `None` when nothing remains.
pub fn secure_filename(name: &str) -> Option<String> {
    let flattened: String = name
        .chars()
        .filter_map(|c| if c.is_ascii() { Some(c) } else { fold_accent(c) })
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        return None;
    }

    let stem = trimmed.split('.').next().unwrap_or_default().to_ascii_uppercase();
    if WINDOWS_DEVICE_NAMES.contains(&stem.as_str()) {
        Some(format!("_{trimmed}"))
    } else {
        Some(trimmed.to_string())
    }
}

/// Writes uploaded avatar images and records them on the account.
#[derive(Debug, Clone)]
pub struct AvatarUploader {
    dir: PathBuf,
    max_bytes: u64,
}

impl AvatarUploader {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Accept an upload for `username` and return the stored name.
    ///
    /// On any failure after the image was written, the image is removed again
    /// so the asset directory never holds files no account points at.
    pub fn accept(
        &self,
        store: &AccountStore,
        username: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<String> {
        if bytes.len() as u64 > self.max_bytes {
            tracing::warn!(username, size = bytes.len(), limit = self.max_bytes, "avatar too large");
            return Err(StoreError::InvalidInput(format!(
                "avatar is {} bytes, the limit is {}",
                bytes.len(),
                self.max_bytes
            )));
        }
        if !is_allowed_extension(original_name) {
            return Err(StoreError::UnsupportedFormat(original_name.to_string()));
        }
        let safe_name = secure_filename(original_name).ok_or_else(|| {
            StoreError::InvalidInput(format!("no usable characters in filename {original_name:?}"))
        })?;
        if !is_allowed_extension(&safe_name) {
            return Err(StoreError::UnsupportedFormat(safe_name));
        }
        if username.contains(['/', '\\']) || username.trim() != username {
            return Err(StoreError::InvalidInput(format!(
                "username {username:?} cannot be used in a file name"
            )));
        }
        if !store.contains(username)? {
            return Err(StoreError::NotFound(username.to_string()));
        }

        let timestamp = chrono::Utc::now().timestamp();
        let target = self.dir.join(stored_name(username, timestamp, &safe_name));
        stage_bytes(&target, bytes)?.commit()?;

        match store.set_avatar_at(username, &safe_name, timestamp) {
            Ok(recorded) => {
                tracing::info!(username, avatar = %recorded, "avatar uploaded");
                Ok(recorded)
            }
            Err(err) => {
                let _ = fs::remove_file(&target);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_check_ignores_case() {
        assert!(is_allowed_extension("photo.PNG"));
        assert!(is_allowed_extension("a.b.JpEg"));
        assert!(is_allowed_extension(".gif"));
        assert!(!is_allowed_extension("malware.exe"));
        assert!(!is_allowed_extension("png"));
        assert!(!is_allowed_extension("photo.png.exe"));
    }

    #[test]
    fn test_stored_name_layout() {
        assert_eq!(stored_name("alice", 1700000000, "me.png"), "alice_1700000000_me.png");
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My cool movie.mov").as_deref(), Some("My_cool_movie.mov"));
        assert_eq!(secure_filename("../../../etc/passwd").as_deref(), Some("etc_passwd"));
        assert_eq!(secure_filename("C:\\photos\\me.jpg").as_deref(), Some("C_photos_me.jpg"));
        assert_eq!(secure_filename("foto_ção.png").as_deref(), Some("foto_cao.png"));
        assert_eq!(secure_filename("Müller Æsir.gif").as_deref(), Some("Muller_sir.gif"));
        assert_eq!(secure_filename("con.png").as_deref(), Some("_con.png"));
        assert_eq!(secure_filename("...").as_deref(), None);
        assert_eq!(secure_filename("日本").as_deref(), None);
    }
}
