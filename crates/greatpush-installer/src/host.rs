use anyhow::Result;
use greatpush_core::CLIENT_UNIQUE_ID_KEY;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::KeyValueStore;

/// The build of the host binary that is running right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBuild {
    pub app_version: String,
    /// Modification time of the binary's bundled resources, in milliseconds.
    pub modified_time: u64,
    /// The bundle shipped with the binary.
    pub bundle_path: PathBuf,
    pub bundle_file_name: String,
}

pub trait HostEnvironment: Send + Sync {
    fn binary_build(&self) -> Result<BinaryBuild>;

    fn binary_contents_hash(&self) -> Option<String> {
        None
    }
}

/// Host hook that restarts the application on another bundle.
pub trait BundleReloader: Send + Sync {
    fn reload(&self, bundle_path: &Path) -> Result<()>;
}

pub trait DeviceIdentity: Send + Sync {
    fn device_id(&self) -> Result<String>;
}

/// A random identifier generated once and kept in the settings store.
#[derive(Clone)]
pub struct StoredDeviceIdentity {
    settings: Arc<dyn KeyValueStore>,
}

impl StoredDeviceIdentity {
    pub fn new(settings: Arc<dyn KeyValueStore>) -> Self {
        Self { settings }
    }
}

impl DeviceIdentity for StoredDeviceIdentity {
    fn device_id(&self) -> Result<String> {
        if let Some(existing) = self.settings.get(CLIENT_UNIQUE_ID_KEY)? {
            if !existing.trim().is_empty() {
                return Ok(existing);
            }
        }
        let generated = uuid::Uuid::new_v4().to_string();
        self.settings.set(CLIENT_UNIQUE_ID_KEY, &generated)?;
        Ok(generated)
    }
}
