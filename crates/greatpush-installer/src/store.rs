use anyhow::{Context, Result};
use greatpush_core::{package_dir_name, PackageMetadata, UpdateError};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::fs_utils::remove_dir_if_exists;
use crate::UpdateLayout;

/// Folder-per-version package storage keyed by the shortened hash.
#[derive(Debug, Clone)]
pub struct PackageStore {
    layout: UpdateLayout,
}

impl PackageStore {
    pub fn new(layout: UpdateLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &UpdateLayout {
        &self.layout
    }

    /// An existing directory is returned as-is, even when `create_if_missing`.
    pub fn folder(&self, hash: &str, create_if_missing: bool) -> Result<Option<PathBuf>> {
        let dir = self.layout.package_dir(hash)?;
        if dir.is_dir() {
            return Ok(Some(dir));
        }
        if !create_if_missing {
            return Ok(None);
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create package dir: {}", dir.display()))?;
        Ok(Some(dir))
    }

    pub fn package(&self, hash: &str) -> Option<PackageMetadata> {
        let path = self.layout.package_metadata_path(hash).ok()?;
        let raw = fs::read_to_string(&path).ok()?;
        let metadata = PackageMetadata::from_json_str(&raw).ok()?;
        if metadata.package_hash != hash {
            // Another package owns this hash prefix.
            return None;
        }
        Some(metadata)
    }

    pub fn write_package(&self, metadata: &PackageMetadata) -> Result<PathBuf> {
        let path = self.layout.package_metadata_path(&metadata.package_hash)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create package dir: {}", parent.display()))?;
        }
        fs::write(&path, metadata.to_json_string()?)
            .with_context(|| format!("failed to write package metadata: {}", path.display()))?;
        Ok(path)
    }

    pub fn delete(&self, hash: &str) -> Result<()> {
        let dir = self.layout.package_dir(hash)?;
        remove_dir_if_exists(&dir)
            .with_context(|| format!("failed to delete package dir: {}", dir.display()))
    }

    pub fn bundle_path(&self, metadata: &PackageMetadata, bundle_file_name: &str) -> Result<PathBuf> {
        let dir = self.layout.package_dir(&metadata.package_hash)?;
        let rel = metadata
            .relative_bundle_path
            .as_deref()
            .filter(|rel| !rel.is_empty())
            .unwrap_or(bundle_file_name);
        Ok(dir.join(rel))
    }

    /// Prepares an empty directory for a package about to be downloaded.
    ///
    /// Stale partial state under the same prefix is removed first, unless the
    /// directory holds a different package named in `protected` (the ledger's
    /// current/previous hashes).
    pub fn claim_folder(&self, hash: &str, protected: &[&str]) -> Result<PathBuf> {
        let dir = self.layout.package_dir(hash)?;
        if dir.exists() {
            let existing = fs::read_to_string(dir.join(greatpush_core::PACKAGE_FILE_NAME))
                .ok()
                .and_then(|raw| PackageMetadata::from_json_str(&raw).ok())
                .map(|metadata| metadata.package_hash);
            if let Some(existing) = existing {
                if existing != hash && protected.contains(&existing.as_str()) {
                    return Err(UpdateError::HashCollision {
                        hash: hash.to_string(),
                        existing,
                        dir_name: package_dir_name(hash)?,
                    }
                    .into());
                }
            }
            debug!(hash, dir = %dir.display(), "removing stale package directory");
            remove_dir_if_exists(&dir)
                .with_context(|| format!("failed to remove stale package dir: {}", dir.display()))?;
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create package dir: {}", dir.display()))?;
        Ok(dir)
    }

    /// Removes every stored package together with the ledger and staging files.
    pub fn clear(&self) -> Result<()> {
        let root = self.layout.root();
        remove_dir_if_exists(root)
            .with_context(|| format!("failed to clear update storage: {}", root.display()))
    }
}
