mod context;
mod download;
mod failed;
mod fs_utils;
mod host;
mod layout;
mod ledger;
mod merge;
mod pending;
mod resolver;
mod resume;
mod settings;
mod store;

pub use context::{Configuration, UpdateContext, UpdateContextBuilder};
pub use download::{copy_with_progress, DownloadProgress, FilePayloadSource, PayloadSource};
pub use failed::FailedUpdateLedger;
pub use host::{BinaryBuild, BundleReloader, DeviceIdentity, HostEnvironment, StoredDeviceIdentity};
pub use layout::{default_storage_base, UpdateLayout};
pub use ledger::StatusLedger;
pub use merge::{find_bundle, ArchiveExtractor, CommandExtractor, DiffMerger, MergedPackage, UpdateKind};
pub use pending::PendingUpdateTracker;
pub use resolver::{
    has_binary_version_changed, is_package_compatible, purge_updates, BundleResolver, Resolution,
};
pub use resume::ResumeListener;
pub use settings::{JsonFileStore, KeyValueStore, MemoryStore};
pub use store::PackageStore;

#[cfg(test)]
mod tests;
