use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BUNDLE_FILE_NAME, DEFAULT_SERVER_URL};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GreatPushConfig {
    pub deployment_key: String,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    pub app_version: String,
    #[serde(default = "default_bundle_file_name")]
    pub bundle_file_name: String,
    #[serde(default)]
    pub binary_bundle: Option<PathBuf>,
    #[serde(default)]
    pub storage_root: Option<PathBuf>,
    #[serde(default)]
    pub debug_mode: bool,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_bundle_file_name() -> String {
    DEFAULT_BUNDLE_FILE_NAME.to_string()
}

impl GreatPushConfig {
    pub fn new(deployment_key: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            deployment_key: deployment_key.into(),
            server_url: default_server_url(),
            app_version: app_version.into(),
            bundle_file_name: default_bundle_file_name(),
            binary_bundle: None,
            storage_root: None,
            debug_mode: false,
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse greatpush config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.deployment_key.trim().is_empty() {
            return Err(anyhow!("deployment_key must not be empty"));
        }
        if self.app_version.trim().is_empty() {
            return Err(anyhow!("app_version must not be empty"));
        }
        let name = self.bundle_file_name.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(anyhow!(
                "bundle_file_name must be a plain file name: '{}'",
                self.bundle_file_name
            ));
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(anyhow!(
                "server_url must be an http(s) URL: '{}'",
                self.server_url
            ));
        }
        Ok(())
    }
}
