use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::constants::SHORT_HASH_LEN;
use crate::error::UpdateError;

/// Release description handed over by the update server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescriptor {
    #[serde(default)]
    pub package_hash: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    pub package_size: Option<u64>,
    #[serde(default)]
    pub deployment_key: Option<String>,
}

/// One stored package version, persisted as `app.json` in its directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub package_hash: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    pub package_size: Option<u64>,
    #[serde(default)]
    pub deployment_key: Option<String>,
    #[serde(default, rename = "bundlePath")]
    pub relative_bundle_path: Option<String>,
    #[serde(default)]
    pub binary_modified_time: Option<u64>,
    #[serde(default)]
    pub is_pending: bool,
    #[serde(default, rename = "_isDebugOnly", skip_serializing_if = "is_false")]
    pub is_debug_only: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PackageMetadata {
    pub fn from_descriptor(descriptor: &UpdateDescriptor) -> Self {
        Self {
            package_hash: descriptor.package_hash.clone(),
            download_url: Some(descriptor.download_url.clone()).filter(|url| !url.is_empty()),
            app_version: descriptor.app_version.clone(),
            label: descriptor.label.clone(),
            description: descriptor.description.clone(),
            is_mandatory: descriptor.is_mandatory,
            package_size: descriptor.package_size,
            deployment_key: descriptor.deployment_key.clone(),
            ..Self::default()
        }
    }

    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        serde_json::from_str(input).context("failed to parse package metadata")
    }

    pub fn to_json_string(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize package metadata")
    }
}

/// The `current`/`previous` pointer pair stored in `greatpush.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerRecord {
    #[serde(default, rename = "currentPackage")]
    pub current_package: Option<String>,
    #[serde(default, rename = "previousPackage")]
    pub previous_package: Option<String>,
}

impl LedgerRecord {
    pub fn is_empty(&self) -> bool {
        self.current_package.is_none() && self.previous_package.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// On disk and promoted to current; the app has not booted into it yet.
    Installed,
    /// The app booted into it at least once without confirming readiness.
    Attempting,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingUpdate {
    pub hash: String,
    #[serde(rename = "isLoading")]
    pub is_loading: bool,
}

impl PendingUpdate {
    pub fn state(&self) -> PendingState {
        if self.is_loading {
            PendingState::Attempting
        } else {
            PendingState::Installed
        }
    }
}

/// Contents of `hotgreatpush.json`: files of the base package a diff drops.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiffManifest {
    #[serde(default)]
    pub deleted_files: Vec<String>,
}

impl DiffManifest {
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut manifest: Self =
            serde_json::from_str(input).context("failed to parse diff manifest")?;
        manifest.deleted_files = manifest
            .deleted_files
            .iter()
            .map(|entry| normalize_rel_path(entry))
            .filter(|entry| !entry.is_empty())
            .collect();
        Ok(manifest)
    }

    /// `rel_path` uses `/` separators. A deleted directory covers its contents.
    pub fn deletes(&self, rel_path: &str) -> bool {
        let rel_path = normalize_rel_path(rel_path);
        self.deleted_files.iter().any(|entry| {
            rel_path == *entry
                || rel_path
                    .strip_prefix(entry.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

fn normalize_rel_path(input: &str) -> String {
    input
        .replace('\\', "/")
        .trim_start_matches("./")
        .trim_matches('/')
        .to_string()
}

pub fn validate_package_hash(hash: &str) -> Result<(), UpdateError> {
    let valid = !hash.is_empty()
        && hash
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if !valid {
        return Err(UpdateError::InvalidPackageHash(hash.to_string()));
    }
    Ok(())
}

/// Directory name for a package: the leading `SHORT_HASH_LEN` characters.
///
/// Distinct hashes sharing a prefix map to the same directory; the store
/// detects this through the full hash recorded in `app.json`.
pub fn package_dir_name(hash: &str) -> Result<String, UpdateError> {
    validate_package_hash(hash)?;
    Ok(hash.chars().take(SHORT_HASH_LEN).collect())
}
