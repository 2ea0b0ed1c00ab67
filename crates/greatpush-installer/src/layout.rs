use anyhow::{Context, Result};
use greatpush_core::{
    package_dir_name, UpdateError, DOWNLOAD_FILE_NAME, PACKAGE_FILE_NAME, STATUS_FILE_NAME,
    UNZIPPED_FOLDER_NAME,
};
use std::fs;
use std::path::{Path, PathBuf};

/// Paths inside the private update-storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLayout {
    root: PathBuf,
}

impl UpdateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn status_file_path(&self) -> PathBuf {
        self.root.join(STATUS_FILE_NAME)
    }

    pub fn download_file_path(&self) -> PathBuf {
        self.root.join(DOWNLOAD_FILE_NAME)
    }

    pub fn unzipped_dir(&self) -> PathBuf {
        self.root.join(UNZIPPED_FOLDER_NAME)
    }

    pub fn package_dir(&self, hash: &str) -> Result<PathBuf, UpdateError> {
        Ok(self.root.join(package_dir_name(hash)?))
    }

    pub fn package_metadata_path(&self, hash: &str) -> Result<PathBuf, UpdateError> {
        Ok(self.package_dir(hash)?.join(PACKAGE_FILE_NAME))
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))
    }
}

pub fn default_storage_base() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows storage root")?;
        return Ok(PathBuf::from(app_data).join("greatpush"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve storage root")?;
    Ok(PathBuf::from(home).join(".greatpush"))
}
