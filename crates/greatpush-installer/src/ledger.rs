use anyhow::{anyhow, Context, Result};
use greatpush_core::{LedgerRecord, PackageMetadata};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::PackageStore;

/// The persisted `current`/`previous` pointer pair.
///
/// Every mutation is a full read-modify-write of `greatpush.json`; one
/// ledger instance per process is assumed.
#[derive(Debug, Clone)]
pub struct StatusLedger {
    store: PackageStore,
}

impl StatusLedger {
    pub fn new(store: PackageStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &PackageStore {
        &self.store
    }

    /// A corrupt ledger is replaced by an empty one instead of failing.
    pub fn read(&self) -> Result<LedgerRecord> {
        let path = self.store.layout().status_file_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.write(&LedgerRecord::default())?;
                return Ok(LedgerRecord::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read status file: {}", path.display()));
            }
        };

        if raw.trim().is_empty() {
            return Ok(LedgerRecord::default());
        }

        match serde_json::from_str::<LedgerRecord>(&raw) {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "status file is corrupted, recreating it");
                fs::remove_file(&path).with_context(|| {
                    format!("failed to remove corrupted status file: {}", path.display())
                })?;
                self.write(&LedgerRecord::default())?;
                Ok(LedgerRecord::default())
            }
        }
    }

    pub fn write(&self, record: &LedgerRecord) -> Result<()> {
        self.store.layout().ensure_root()?;
        let path = self.store.layout().status_file_path();
        let content =
            serde_json::to_string(record).context("failed to serialize status file")?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write status file: {}", path.display()))
    }

    pub fn reset(&self) -> Result<()> {
        self.write(&LedgerRecord::default())
    }

    pub fn current_package(&self) -> Result<Option<PackageMetadata>> {
        let record = self.read()?;
        Ok(record
            .current_package
            .and_then(|hash| self.store.package(&hash)))
    }

    pub fn previous_package(&self) -> Result<Option<PackageMetadata>> {
        let record = self.read()?;
        Ok(record
            .previous_package
            .and_then(|hash| self.store.package(&hash)))
    }

    /// The current hash as recorded in the package itself; dangling pointers read as none.
    pub fn current_hash(&self) -> Result<Option<String>> {
        Ok(self.current_package()?.map(|package| package.package_hash))
    }

    pub fn previous_hash(&self) -> Result<Option<String>> {
        Ok(self.previous_package()?.map(|package| package.package_hash))
    }

    pub fn current_folder(&self) -> Result<Option<PathBuf>> {
        let record = self.read()?;
        match record.current_package {
            Some(hash) => self.store.folder(&hash, false),
            None => Ok(None),
        }
    }

    /// Promotes `new_hash` to current.
    ///
    /// An unconfirmed current (`is_current_pending`) is deleted rather than
    /// kept as previous, so a rollback never lands on an unverified package.
    pub fn install(&self, new_hash: &str, is_current_pending: bool) -> Result<()> {
        let mut record = self.read()?;
        if record.current_package.as_deref() == Some(new_hash) {
            return Ok(());
        }
        if self.store.folder(new_hash, false)?.is_none() {
            return Err(anyhow!(
                "cannot install package '{new_hash}': it has not been downloaded"
            ));
        }

        if is_current_pending {
            if let Some(current) = record.current_package.as_deref() {
                self.store.delete(current)?;
            }
        } else {
            if let Some(previous) = self.previous_hash()? {
                if previous != new_hash {
                    self.store.delete(&previous)?;
                }
            }
            record.previous_package = match record.current_package.take() {
                Some(hash) if self.store.folder(&hash, false)?.is_some() => Some(hash),
                _ => None,
            };
        }

        record.current_package = Some(new_hash.to_string());
        self.write(&record)?;
        info!(hash = new_hash, "installed package as current");
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        let mut record = self.read()?;
        if let Some(current) = record.current_package.as_deref() {
            self.store.delete(current)?;
        }
        info!(
            from = record.current_package.as_deref().unwrap_or("<none>"),
            to = record.previous_package.as_deref().unwrap_or("<binary>"),
            "rolling back current package"
        );
        let previous = record.previous_package.take();
        record.current_package = match previous {
            Some(hash) if self.store.folder(&hash, false)?.is_some() => Some(hash),
            _ => None,
        };
        self.write(&record)
    }
}
