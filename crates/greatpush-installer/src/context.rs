use anyhow::{anyhow, Context, Result};
use greatpush_core::{
    GreatPushConfig, InstallMode, PackageMetadata, UpdateDescriptor, UpdateError, UpdateState,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::fs_utils::{remove_dir_if_exists, remove_file_if_exists};
use crate::merge::{ArchiveExtractor, CommandExtractor, DiffMerger};
use crate::resolver::{has_binary_version_changed, is_package_compatible, purge_updates};
use crate::{
    BundleReloader, BundleResolver, DeviceIdentity, DownloadProgress, FailedUpdateLedger,
    FilePayloadSource, HostEnvironment, KeyValueStore, PackageStore, PayloadSource,
    PendingUpdateTracker, Resolution, ResumeListener, StatusLedger, StoredDeviceIdentity,
    UpdateLayout,
};

static LIVE_CONTEXTS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub app_version: String,
    pub client_unique_id: String,
    pub deployment_key: String,
    pub server_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_hash: Option<String>,
}

pub struct UpdateContextBuilder {
    layout: UpdateLayout,
    config: GreatPushConfig,
    settings: Option<Arc<dyn KeyValueStore>>,
    host: Option<Box<dyn HostEnvironment>>,
    reloader: Option<Box<dyn BundleReloader>>,
    device: Option<Box<dyn DeviceIdentity>>,
    source: Option<Box<dyn PayloadSource>>,
    extractor: Option<Box<dyn ArchiveExtractor>>,
    restart_check: bool,
}

impl UpdateContextBuilder {
    /// Whether `build` runs the process-start crash check. Defaults to on.
    pub fn run_restart_check(mut self, enabled: bool) -> Self {
        self.restart_check = enabled;
        self
    }

    pub fn settings(mut self, settings: Arc<dyn KeyValueStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn host(mut self, host: impl HostEnvironment + 'static) -> Self {
        self.host = Some(Box::new(host));
        self
    }

    pub fn reloader(mut self, reloader: impl BundleReloader + 'static) -> Self {
        self.reloader = Some(Box::new(reloader));
        self
    }

    pub fn device_identity(mut self, device: impl DeviceIdentity + 'static) -> Self {
        self.device = Some(Box::new(device));
        self
    }

    pub fn payload_source(mut self, source: impl PayloadSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn extractor(mut self, extractor: impl ArchiveExtractor + 'static) -> Self {
        self.extractor = Some(Box::new(extractor));
        self
    }

    /// Builds the context and, unless disabled, runs the process-start crash check.
    pub fn build(self) -> Result<UpdateContext> {
        self.config.validate()?;
        let settings = self
            .settings
            .ok_or_else(|| anyhow!("update context requires a settings store"))?;
        let host = self
            .host
            .ok_or_else(|| anyhow!("update context requires a host environment"))?;
        let reloader = self
            .reloader
            .ok_or_else(|| anyhow!("update context requires a bundle reloader"))?;
        let device = self
            .device
            .unwrap_or_else(|| Box::new(StoredDeviceIdentity::new(settings.clone())));
        let source = self
            .source
            .unwrap_or_else(|| Box::new(FilePayloadSource));
        let extractor = self
            .extractor
            .unwrap_or_else(|| Box::new(CommandExtractor));

        let previous = LIVE_CONTEXTS.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            warn!(
                live = previous + 1,
                "another update context already exists in this process; only one should manage a storage root"
            );
        }

        let store = PackageStore::new(self.layout.clone());
        let mut context = UpdateContext {
            config: self.config,
            layout: self.layout,
            ledger: StatusLedger::new(store),
            pending: PendingUpdateTracker::new(settings.clone()),
            failed: FailedUpdateLedger::new(settings),
            host,
            reloader,
            device,
            source,
            extractor,
            did_update: false,
            is_running_binary_version: false,
            need_to_report_rollback: false,
            resume: None,
        };
        if self.restart_check {
            context.initialize_after_restart()?;
        }
        Ok(context)
    }
}

/// The update manager for one storage root, constructed once per process.
pub struct UpdateContext {
    config: GreatPushConfig,
    layout: UpdateLayout,
    ledger: StatusLedger,
    pending: PendingUpdateTracker,
    failed: FailedUpdateLedger,
    host: Box<dyn HostEnvironment>,
    reloader: Box<dyn BundleReloader>,
    device: Box<dyn DeviceIdentity>,
    source: Box<dyn PayloadSource>,
    extractor: Box<dyn ArchiveExtractor>,
    did_update: bool,
    is_running_binary_version: bool,
    need_to_report_rollback: bool,
    resume: Option<ResumeListener>,
}

impl Drop for UpdateContext {
    fn drop(&mut self) {
        LIVE_CONTEXTS.fetch_sub(1, Ordering::SeqCst);
    }
}

impl UpdateContext {
    pub fn builder(layout: UpdateLayout, config: GreatPushConfig) -> UpdateContextBuilder {
        UpdateContextBuilder {
            layout,
            config,
            settings: None,
            host: None,
            reloader: None,
            device: None,
            source: None,
            extractor: None,
            restart_check: true,
        }
    }

    pub fn config(&self) -> &GreatPushConfig {
        &self.config
    }

    pub fn layout(&self) -> &UpdateLayout {
        &self.layout
    }

    pub fn store(&self) -> &PackageStore {
        self.ledger.store()
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    pub fn pending(&self) -> &PendingUpdateTracker {
        &self.pending
    }

    pub fn failed(&self) -> &FailedUpdateLedger {
        &self.failed
    }

    pub fn did_update(&self) -> bool {
        self.did_update
    }

    pub fn is_running_binary_version(&self) -> bool {
        self.is_running_binary_version
    }

    pub fn need_to_report_rollback(&self) -> bool {
        self.need_to_report_rollback
    }

    pub fn resume_listener(&self) -> Option<&ResumeListener> {
        self.resume.as_ref()
    }

    /// Advances the pending-update state machine at process start.
    ///
    /// A record still marked loading means the previous boot into that update
    /// never confirmed readiness, so it is rolled back.
    pub fn initialize_after_restart(&mut self) -> Result<()> {
        self.did_update = false;

        let Some(pending) = self.pending.get()? else {
            return Ok(());
        };

        let binary = self.host.binary_build()?;
        let Some(package) = self.ledger.current_package()? else {
            info!("skipping pending update check, no current package");
            return Ok(());
        };
        if !is_package_compatible(&package, &binary) && has_binary_version_changed(&package, &binary)
        {
            info!("skipping pending update check, binary version is newer");
            return Ok(());
        }

        if pending.is_loading {
            warn!(
                hash = %pending.hash,
                "update did not finish loading the last time, rolling back to the previous version"
            );
            self.need_to_report_rollback = true;
            self.rollback()?;
        } else {
            self.did_update = true;
            self.pending.save(&pending.hash, true)?;
        }
        Ok(())
    }

    pub fn configuration(&self) -> Result<Configuration> {
        Ok(Configuration {
            app_version: self.config.app_version.clone(),
            client_unique_id: self.device.device_id()?,
            deployment_key: self.config.deployment_key.clone(),
            server_url: self.config.server_url.clone(),
            package_hash: self.host.binary_contents_hash(),
        })
    }

    /// Fetches and reconstructs a package, returning its stored metadata.
    ///
    /// Payloads rejected as invalid are recorded as failed. No partial package
    /// directory or staging file survives an error.
    pub fn download_update(
        &mut self,
        descriptor: &UpdateDescriptor,
        notify_progress: bool,
        on_progress: &mut dyn FnMut(DownloadProgress),
    ) -> Result<PackageMetadata> {
        let hash = descriptor.package_hash.as_str();
        if hash.is_empty() {
            return Err(UpdateError::MissingPackageHash.into());
        }
        greatpush_core::validate_package_hash(hash)?;

        let binary = self.host.binary_build()?;
        let mut metadata = PackageMetadata::from_descriptor(descriptor);
        metadata.binary_modified_time = Some(binary.modified_time);

        if let Err(err) = self.download_package(
            &mut metadata,
            &binary.bundle_file_name,
            notify_progress,
            on_progress,
        ) {
            if UpdateError::from_anyhow(&err).is_some_and(UpdateError::is_invalid_update) {
                self.failed.record(&metadata)?;
            }
            return Err(err.context(format!("failed to download update '{hash}'")));
        }

        Ok(self.ledger.store().package(hash).unwrap_or(metadata))
    }

    fn download_package(
        &self,
        metadata: &mut PackageMetadata,
        bundle_file_name: &str,
        notify_progress: bool,
        on_progress: &mut dyn FnMut(DownloadProgress),
    ) -> Result<()> {
        self.layout.ensure_root()?;
        let record = self.ledger.read()?;
        let protected = [
            record.current_package.as_deref(),
            record.previous_package.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
        let new_dir = self
            .ledger
            .store()
            .claim_folder(&metadata.package_hash, &protected)?;

        let result = self.stage_package(
            metadata,
            &new_dir,
            bundle_file_name,
            notify_progress,
            on_progress,
        );
        if result.is_err() {
            for dir in [new_dir.clone(), self.layout.unzipped_dir()] {
                if let Err(err) = remove_dir_if_exists(&dir) {
                    warn!(path = %dir.display(), error = %err, "failed to remove partial download");
                }
            }
            let staging = self.layout.download_file_path();
            if let Err(err) = remove_file_if_exists(&staging) {
                warn!(path = %staging.display(), error = %err, "failed to remove partial download");
            }
        }
        result
    }

    fn stage_package(
        &self,
        metadata: &mut PackageMetadata,
        new_dir: &Path,
        bundle_file_name: &str,
        notify_progress: bool,
        on_progress: &mut dyn FnMut(DownloadProgress),
    ) -> Result<()> {
        let staging = self.layout.download_file_path();
        remove_file_if_exists(&staging)
            .with_context(|| format!("failed to remove stale {}", staging.display()))?;

        let url = metadata
            .download_url
            .clone()
            .ok_or_else(|| anyhow!("update '{}' has no download url", metadata.package_hash))?;
        self.source.fetch(&url, &staging, &mut |progress: DownloadProgress| {
            if notify_progress {
                on_progress(progress);
            }
        })?;

        let current_dir = self.ledger.current_folder()?;
        let merged = DiffMerger::new(&self.layout, self.extractor.as_ref()).merge(
            &metadata.package_hash,
            &staging,
            new_dir,
            current_dir.as_deref(),
            bundle_file_name,
        )?;
        metadata.relative_bundle_path = Some(merged.relative_bundle_path);
        self.ledger.store().write_package(metadata)?;
        Ok(())
    }

    /// Promotes a downloaded package to current and arms the pending record.
    pub fn install_update(
        &mut self,
        descriptor: &UpdateDescriptor,
        install_mode: InstallMode,
        minimum_background_duration: Duration,
    ) -> Result<()> {
        let hash = descriptor.package_hash.as_str();
        if hash.is_empty() {
            return Err(UpdateError::MissingPackageHash.into());
        }

        let current_is_pending = self.pending.is_pending(None)?;
        self.ledger.install(hash, current_is_pending)?;
        self.pending.save(hash, false)?;

        if install_mode.uses_lifecycle_listener() {
            match self.resume.as_mut() {
                Some(listener) => {
                    listener.set_minimum_background_duration(minimum_background_duration)
                }
                None => {
                    self.resume = Some(ResumeListener::new(
                        install_mode,
                        minimum_background_duration,
                    ))
                }
            }
        }
        info!(hash, mode = install_mode.as_str(), "update installed");
        Ok(())
    }

    pub fn get_update_metadata(&self, state: UpdateState) -> Result<Option<PackageMetadata>> {
        let Some(mut current) = self.ledger.current_package()? else {
            return Ok(None);
        };
        let current_is_pending = self.pending.is_pending(Some(&current.package_hash))?;

        match state {
            UpdateState::Pending if !current_is_pending => Ok(None),
            UpdateState::Running if current_is_pending => self.ledger.previous_package(),
            _ => {
                current.is_debug_only = self.is_running_binary_version;
                current.is_pending = current_is_pending;
                Ok(Some(current))
            }
        }
    }

    /// The app's signal that it booted fine on the current package.
    pub fn notify_application_ready(&self) -> Result<()> {
        self.pending.clear()
    }

    pub fn restart_app(&mut self, only_if_update_pending: bool) -> Result<bool> {
        if only_if_update_pending && !self.pending.is_pending(None)? {
            return Ok(false);
        }
        self.load_bundle()?;
        Ok(true)
    }

    fn load_bundle(&mut self) -> Result<PathBuf> {
        self.resume = None;
        let resolution = self.resolve_bundle()?;
        self.reloader.reload(&resolution.bundle_path)?;
        self.initialize_after_restart()?;
        Ok(resolution.bundle_path)
    }

    pub fn resolve_bundle(&mut self) -> Result<Resolution> {
        let binary = self.host.binary_build()?;
        let resolution =
            BundleResolver::new(&self.ledger, &self.pending, &self.failed, self.config.debug_mode)
                .resolve(&binary)?;
        self.is_running_binary_version = resolution.is_running_binary_version;
        if resolution.is_running_binary_version {
            self.did_update = false;
        }
        Ok(resolution)
    }

    pub fn is_first_run(&self, hash: &str) -> Result<bool> {
        if !self.did_update || hash.is_empty() {
            return Ok(false);
        }
        Ok(self.ledger.current_hash()?.as_deref() == Some(hash))
    }

    pub fn is_failed_update(&self, hash: &str) -> Result<bool> {
        self.failed.contains(hash)
    }

    /// Reverts to the previous package and records the current one as failed.
    pub fn rollback(&mut self) -> Result<()> {
        if let Some(failed_package) = self.ledger.current_package()? {
            self.failed.record(&failed_package)?;
        }
        self.ledger.rollback()?;
        self.pending.clear()
    }

    /// The package rolled back at the last start, reported once.
    pub fn take_rollback_report(&mut self) -> Result<Option<PackageMetadata>> {
        if !self.need_to_report_rollback {
            return Ok(None);
        }
        self.need_to_report_rollback = false;
        self.failed.last()
    }

    pub fn clear_updates(&mut self) -> Result<()> {
        info!("clearing updates");
        purge_updates(&self.ledger, &self.pending, &self.failed)
    }

    pub fn on_host_pause(&mut self, now: Instant) -> Result<()> {
        if self.resume.is_none() {
            return Ok(());
        }
        let update_pending = self.pending.is_pending(None)?;
        if let Some(listener) = self.resume.as_mut() {
            listener.on_pause(now, update_pending);
        }
        Ok(())
    }

    pub fn on_host_resume(&mut self, now: Instant) -> Result<bool> {
        let fire = self
            .resume
            .as_mut()
            .is_some_and(|listener| listener.on_resume(now));
        if fire {
            info!("loading bundle on resume");
            self.load_bundle()?;
        }
        Ok(fire)
    }

    pub fn on_host_tick(&mut self, now: Instant) -> Result<bool> {
        let fire = self
            .resume
            .as_mut()
            .is_some_and(|listener| listener.poll(now));
        if fire {
            info!("loading bundle on suspend");
            self.load_bundle()?;
        }
        Ok(fire)
    }
}
