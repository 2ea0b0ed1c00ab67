use anyhow::{Context, Result};
use greatpush_core::{PackageMetadata, FAILED_UPDATES_KEY};
use std::sync::Arc;
use tracing::warn;

use crate::KeyValueStore;

/// Append-only list of packages that were rolled back or rejected.
#[derive(Clone)]
pub struct FailedUpdateLedger {
    settings: Arc<dyn KeyValueStore>,
}

impl FailedUpdateLedger {
    pub fn new(settings: Arc<dyn KeyValueStore>) -> Self {
        Self { settings }
    }

    pub fn list(&self) -> Result<Vec<PackageMetadata>> {
        let Some(raw) = self.settings.get(FAILED_UPDATES_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                warn!(error = %err, "failed updates list is corrupted, resetting it");
                self.settings.set(FAILED_UPDATES_KEY, "[]")?;
                Ok(Vec::new())
            }
        }
    }

    pub fn record(&self, package: &PackageMetadata) -> Result<()> {
        let mut entries = self.list()?;
        entries.push(package.clone());
        let raw = serde_json::to_string(&entries).context("failed to serialize failed updates")?;
        self.settings.set(FAILED_UPDATES_KEY, &raw)
    }

    pub fn contains(&self, hash: &str) -> Result<bool> {
        Ok(self
            .list()?
            .iter()
            .any(|entry| entry.package_hash == hash))
    }

    pub fn last(&self) -> Result<Option<PackageMetadata>> {
        Ok(self.list()?.pop())
    }

    pub fn clear(&self) -> Result<()> {
        self.settings.remove(FAILED_UPDATES_KEY)
    }
}
