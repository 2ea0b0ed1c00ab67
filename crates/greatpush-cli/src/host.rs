use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, Context, Result};
use greatpush_core::GreatPushConfig;
use greatpush_installer::{BinaryBuild, BundleReloader, HostEnvironment};

use crate::render::TerminalRenderer;
use crate::transport::sha256_file;

/// Desktop stand-in for the host binary, described by the config file.
#[derive(Debug, Clone)]
pub(crate) struct ConfiguredHost {
    app_version: String,
    bundle_path: PathBuf,
    bundle_file_name: String,
}

impl ConfiguredHost {
    /// Relative bundle paths resolve against `config_dir`.
    pub(crate) fn from_config(config: &GreatPushConfig, config_dir: &Path) -> Self {
        let bundle_path = match &config.binary_bundle {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => config_dir.join(path),
            None => config_dir.join(&config.bundle_file_name),
        };
        Self {
            app_version: config.app_version.clone(),
            bundle_path,
            bundle_file_name: config.bundle_file_name.clone(),
        }
    }
}

impl HostEnvironment for ConfiguredHost {
    fn binary_build(&self) -> Result<BinaryBuild> {
        Ok(BinaryBuild {
            app_version: self.app_version.clone(),
            modified_time: modified_time_millis(&self.bundle_path)?,
            bundle_path: self.bundle_path.clone(),
            bundle_file_name: self.bundle_file_name.clone(),
        })
    }

    fn binary_contents_hash(&self) -> Option<String> {
        sha256_file(&self.bundle_path).ok()
    }
}

pub(crate) fn modified_time_millis(path: &Path) -> Result<u64> {
    let modified = fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .with_context(|| format!("failed to stat binary bundle: {}", path.display()))?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("binary bundle mtime predates the epoch: {}", path.display()))?;
    u64::try_from(since_epoch.as_millis())
        .with_context(|| format!("binary bundle mtime out of range: {}", path.display()))
}

/// Prints where the host would boot from instead of restarting anything.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PrintingReloader {
    renderer: TerminalRenderer,
}

impl PrintingReloader {
    pub(crate) fn new(renderer: TerminalRenderer) -> Self {
        Self { renderer }
    }
}

impl BundleReloader for PrintingReloader {
    fn reload(&self, bundle_path: &Path) -> Result<()> {
        self.renderer
            .print_status("ok", &format!("reload {}", bundle_path.display()));
        Ok(())
    }
}
