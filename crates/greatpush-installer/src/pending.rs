use anyhow::{Context, Result};
use greatpush_core::{PendingUpdate, PENDING_UPDATE_KEY};
use std::sync::Arc;
use tracing::warn;

use crate::KeyValueStore;

/// The single record that carries an unconfirmed update across restarts.
#[derive(Clone)]
pub struct PendingUpdateTracker {
    settings: Arc<dyn KeyValueStore>,
}

impl PendingUpdateTracker {
    pub fn new(settings: Arc<dyn KeyValueStore>) -> Self {
        Self { settings }
    }

    pub fn get(&self) -> Result<Option<PendingUpdate>> {
        let Some(raw) = self.settings.get(PENDING_UPDATE_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(pending) => Ok(Some(pending)),
            Err(err) => {
                warn!(record = %raw, error = %err, "unable to parse pending update record");
                Ok(None)
            }
        }
    }

    pub fn save(&self, hash: &str, is_loading: bool) -> Result<()> {
        let record = PendingUpdate {
            hash: hash.to_string(),
            is_loading,
        };
        let raw = serde_json::to_string(&record).context("failed to serialize pending update")?;
        self.settings.set(PENDING_UPDATE_KEY, &raw)
    }

    pub fn clear(&self) -> Result<()> {
        self.settings.remove(PENDING_UPDATE_KEY)
    }

    /// True for an installed update the app has not booted into yet,
    /// optionally restricted to `hash`.
    pub fn is_pending(&self, hash: Option<&str>) -> Result<bool> {
        let Some(pending) = self.get()? else {
            return Ok(false);
        };
        let hash_matches = match hash {
            Some(hash) => pending.hash == hash,
            None => true,
        };
        Ok(!pending.is_loading && hash_matches)
    }
}
