//! Perfil Account Store
//!
//! Every user's account lives in one JSON document. Each operation runs a
//! full cycle against that file:
//!
//! ```text
//!   lock ──► load ──► normalize ──► (persist if migrated)
//!                                         │
//!                                         ▼
//!   unlock ◄── persist if changed ◄── apply one mutation
//! ```
//!
//! ## Key Properties
//!
//! - **Atomic replacement**: saves go through a temp file and a rename
//!   ([`document::PersistentDocument`]), so a crash never leaves a half-written
//!   document.
//! - **Migration on read**: legacy and incomplete records are upgraded on
//!   every load ([`account::normalize`]); already-current documents are never
//!   rewritten.
//! - **Serialized cycles**: one lock per store instance spans the whole
//!   load-mutate-save cycle, so concurrent callers cannot lose each other's
//!   updates.

pub mod account;
pub mod avatar;
pub mod config;
pub mod document;
pub mod error;


use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

pub use account::{Account, Accounts, NormalizeReport, DEFAULT_THEME};
pub use avatar::AvatarUploader;
pub use config::StoreConfig;
pub use document::PersistentDocument;
pub use error::{Result, StoreError};

use account::RawDocument;

// ============================================================================
// Account Store
// ============================================================================

/// The account store. Construct once and share (e.g. behind an `Arc`).
pub struct AccountStore {
    document: PersistentDocument<RawDocument>,
    default_theme: String,
    /// Held across every load-mutate-save cycle.
    cycle: Mutex<()>,
    writes: AtomicU64,
}

impl AccountStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            document: PersistentDocument::new(config.document_path.clone()),
            default_theme: config.default_theme.clone(),
            cycle: Mutex::new(()),
            writes: AtomicU64::new(0),
        }
    }

    /// Store at `path` with the default configuration otherwise.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::new(&StoreConfig {
            document_path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    pub fn path(&self) -> &Path {
        self.document.path()
    }

    /// Number of document saves performed through this instance, migrations
    /// included. Reads of an up-to-date document never add to it.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Cycle plumbing
    // ========================================================================

    /// Load and normalize. Must be called with `cycle` held.
    fn load_normalized(&self) -> Result<(Accounts, NormalizeReport)> {
        let mut raw = self.document.load()?;
        let report = account::normalize(&mut raw, &self.default_theme)
            .map_err(|message| StoreError::corrupt(self.path(), message))?;
        let accounts =
            account::decode(raw).map_err(|message| StoreError::corrupt(self.path(), message))?;

        if report.changed() {
            tracing::info!(
                path = %self.path().display(),
                upgraded_legacy = report.upgraded_legacy,
                filled_fields = report.filled_fields,
                "migrated account document"
            );
            self.persist(&accounts)?;
        }
        Ok((accounts, report))
    }

    fn persist(&self, accounts: &Accounts) -> Result<()> {
        let raw = account::encode(accounts).map_err(|err| {
            StoreError::storage(
                self.path(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            )
        })?;
        self.document.save(&raw)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Run one read-only step under the lock.
    fn read<R>(&self, f: impl FnOnce(&Accounts) -> R) -> Result<R> {
        let _cycle = self.cycle.lock();
        let (accounts, _) = self.load_normalized()?;
        Ok(f(&accounts))
    }

    /// Run one mutation under the lock; `f` reports whether it changed
    /// anything, and only then is the document saved.
    fn mutate<R>(&self, f: impl FnOnce(&mut Accounts) -> Result<(R, bool)>) -> Result<R> {
        let _cycle = self.cycle.lock();
        let (mut accounts, _) = self.load_normalized()?;
        let (out, changed) = f(&mut accounts)?;
        if changed {
            self.persist(&accounts)?;
        }
        Ok(out)
    }

    /// Like [`mutate`](Self::mutate) for a single existing account.
    fn mutate_account<R>(
        &self,
        username: &str,
        f: impl FnOnce(&mut Account) -> Result<(R, bool)>,
    ) -> Result<R> {
        self.mutate(|accounts| {
            let account = accounts
                .get_mut(username)
                .ok_or_else(|| StoreError::NotFound(username.to_string()))?;
            f(account)
        })
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Create an account. The username is trimmed; the secret is stored as
    /// given.
    pub fn register(&self, username: &str, secret: &str) -> Result<()> {
        let username = username.trim();
        if username.is_empty() || secret.is_empty() {
            return Err(StoreError::InvalidInput(
                "username and password are required".to_string(),
            ));
        }

        self.mutate(|accounts| {
            if accounts.contains_key(username) {
                tracing::warn!(username, "registration rejected: already exists");
                return Err(StoreError::AlreadyExists(username.to_string()));
            }
            accounts.insert(
                username.to_string(),
                Account::new(secret, self.default_theme.as_str()),
            );
            Ok(((), true))
        })?;

        tracing::info!(username, "account registered");
        Ok(())
    }

    /// True iff `username` exists and its secret equals `secret` exactly.
    pub fn authenticate(&self, username: &str, secret: &str) -> Result<bool> {
        let ok = self.read(|accounts| {
            accounts
                .get(username)
                .is_some_and(|account| account.password_secret == secret)
        })?;
        tracing::debug!(username, ok, "authenticate");
        Ok(ok)
    }

    /// Replace the secret. An empty `new_secret` is ignored. Returns whether
    /// the document was written.
    pub fn update_password(&self, username: &str, new_secret: &str) -> Result<bool> {
        self.mutate_account(username, |account| {
            let changed = !new_secret.is_empty() && account.password_secret != new_secret;
            if changed {
                account.password_secret = new_secret.to_string();
            }
            Ok((changed, changed))
        })
    }

    /// Replace the theme. An empty `new_theme` is ignored. Returns whether the
    /// document was written.
    pub fn update_theme(&self, username: &str, new_theme: &str) -> Result<bool> {
        self.mutate_account(username, |account| {
            let changed = !new_theme.is_empty() && account.theme != new_theme;
            if changed {
                account.theme = new_theme.to_string();
            }
            Ok((changed, changed))
        })
    }

    /// Record an avatar for `username`, stamped with the current time.
    ///
    /// `filename` must already be sanitized (see [`avatar::secure_filename`]);
    /// the image itself must be placed under the returned name by the upload
    /// handler.
    pub fn set_avatar(&self, username: &str, filename: &str) -> Result<String> {
        self.set_avatar_at(username, filename, chrono::Utc::now().timestamp())
    }

    /// [`set_avatar`](Self::set_avatar) with an explicit unix timestamp.
    pub fn set_avatar_at(&self, username: &str, filename: &str, timestamp: i64) -> Result<String> {
        if !avatar::is_allowed_extension(filename) {
            tracing::warn!(username, filename, "avatar rejected: unsupported format");
            return Err(StoreError::UnsupportedFormat(filename.to_string()));
        }

        let stored = avatar::stored_name(username, timestamp, filename);
        self.mutate_account(username, |account| {
            account.avatar_ref = Some(stored.clone());
            Ok(((), true))
        })?;
        Ok(stored)
    }

    /// Append a note. Whitespace-only text is ignored; otherwise the trimmed
    /// text goes to the end of the list. Returns whether a note was added.
    pub fn append_note(&self, username: &str, text: &str) -> Result<bool> {
        let text = text.trim();
        self.mutate_account(username, |account| {
            if text.is_empty() {
                return Ok((false, false));
            }
            account.push_note(text.to_string());
            Ok((true, true))
        })
    }

    // ========================================================================
    // Read Operations
    // ========================================================================

    /// The normalized profile of `username`, if it exists.
    pub fn account(&self, username: &str) -> Result<Option<Account>> {
        self.read(|accounts| accounts.get(username).cloned())
    }

    pub fn contains(&self, username: &str) -> Result<bool> {
        self.read(|accounts| accounts.contains_key(username))
    }

    /// All usernames, sorted.
    pub fn usernames(&self) -> Result<Vec<String>> {
        self.read(|accounts| accounts.keys().cloned().collect())
    }

    /// Run a load/normalize cycle and report what had to be migrated.
    pub fn migrate(&self) -> Result<NormalizeReport> {
        let _cycle = self.cycle.lock();
        let (_, report) = self.load_normalized()?;
        Ok(report)
    }
}
