//! Durable storage for the [`CredentialRecord`].

use crate::oauth::token::CredentialRecord;
use eyre::Context;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Persists a single credential record.
///
/// Stores do no validation of their own: [`load`](TokenStore::load) returns whatever
/// was last saved, or an error if the stored data cannot be decoded. Deciding whether
/// a record is still trustworthy is up to the caller.
pub trait TokenStore: Send + Sync + fmt::Debug {
    /// Reads the stored record, `Ok(None)` if nothing is stored.
    fn load(&self) -> eyre::Result<Option<CredentialRecord>>;

    /// Replaces the stored record.
    fn save(&self, record: &CredentialRecord) -> eyre::Result<()>;

    /// Removes the stored record. Clearing an empty store is not an error.
    fn clear(&self) -> eyre::Result<()>;

    fn exists(&self) -> bool;
}

/// A JSON file readable only by the current user.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> eyre::Result<Option<CredentialRecord>> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let record = serde_json::from_str(&json)
            .with_context(|| format!("parse credential record in {}", self.path.display()))?;
        Ok(Some(record))
    }

    fn save(&self, record: &CredentialRecord) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(record).context("serialize credential record")?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .with_context(|| format!("open {} for writing", self.path.display()))?;
        // mode() only applies on creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("restrict permissions on {}", self.path.display()))?;
        }
        std::io::Write::write_all(&mut file, json.as_bytes())
            .with_context(|| format!("write {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> eyre::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", self.path.display())),
        }
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// Keeps the record in process memory. Useful for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    record: Mutex<Option<CredentialRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    /// The currently stored record.
    pub fn snapshot(&self) -> Option<CredentialRecord> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> eyre::Result<Option<CredentialRecord>> {
        Ok(self.snapshot())
    }

    fn save(&self, record: &CredentialRecord) -> eyre::Result<()> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> eyre::Result<()> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn exists(&self) -> bool {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
