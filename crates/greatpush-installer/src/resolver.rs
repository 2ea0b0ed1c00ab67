use anyhow::Result;
use greatpush_core::PackageMetadata;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::{BinaryBuild, FailedUpdateLedger, PendingUpdateTracker, StatusLedger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub bundle_path: PathBuf,
    pub is_running_binary_version: bool,
    /// Stored updates were discarded because they target another binary.
    pub purged: bool,
    /// The installed package being booted, when not the binary.
    pub package: Option<PackageMetadata>,
}

impl Resolution {
    fn binary(binary: &BinaryBuild, purged: bool) -> Self {
        Self {
            bundle_path: binary.bundle_path.clone(),
            is_running_binary_version: true,
            purged,
            package: None,
        }
    }
}

/// The package was installed on top of exactly this binary build.
pub fn is_package_compatible(package: &PackageMetadata, binary: &BinaryBuild) -> bool {
    package.binary_modified_time == Some(binary.modified_time)
        && package.app_version.as_deref() == Some(binary.app_version.as_str())
}

pub fn has_binary_version_changed(package: &PackageMetadata, binary: &BinaryBuild) -> bool {
    package.app_version.as_deref() != Some(binary.app_version.as_str())
}

/// Removes every stored update and the records that refer to them.
pub fn purge_updates(
    ledger: &StatusLedger,
    pending: &PendingUpdateTracker,
    failed: &FailedUpdateLedger,
) -> Result<()> {
    ledger.store().clear()?;
    pending.clear()?;
    failed.clear()?;
    Ok(())
}

/// Picks the bundle to boot: the binary's own or the current package's.
pub struct BundleResolver<'a> {
    ledger: &'a StatusLedger,
    pending: &'a PendingUpdateTracker,
    failed: &'a FailedUpdateLedger,
    debug_mode: bool,
}

impl<'a> BundleResolver<'a> {
    pub fn new(
        ledger: &'a StatusLedger,
        pending: &'a PendingUpdateTracker,
        failed: &'a FailedUpdateLedger,
        debug_mode: bool,
    ) -> Self {
        Self {
            ledger,
            pending,
            failed,
            debug_mode,
        }
    }

    pub fn resolve(&self, binary: &BinaryBuild) -> Result<Resolution> {
        let Some(package) = self.ledger.current_package()? else {
            debug!(bundle = %binary.bundle_path.display(), "no installed update, using binary bundle");
            return Ok(Resolution::binary(binary, false));
        };

        let bundle_path = self
            .ledger
            .store()
            .bundle_path(&package, &binary.bundle_file_name)?;
        if !bundle_path.is_file() {
            warn!(
                hash = %package.package_hash,
                bundle = %bundle_path.display(),
                "current package has no bundle on disk, using binary bundle"
            );
            return Ok(Resolution::binary(binary, false));
        }

        if is_package_compatible(&package, binary) {
            debug!(bundle = %bundle_path.display(), "using installed update bundle");
            return Ok(Resolution {
                bundle_path,
                is_running_binary_version: false,
                purged: false,
                package: Some(package),
            });
        }

        let keep = self.debug_mode && !has_binary_version_changed(&package, binary);
        if !keep {
            info!(
                hash = %package.package_hash,
                package_app_version = package.app_version.as_deref().unwrap_or("<unknown>"),
                app_version = %binary.app_version,
                "binary changed since the update was installed, clearing updates"
            );
            purge_updates(self.ledger, self.pending, self.failed)?;
        }
        Ok(Resolution::binary(binary, !keep))
    }
}
