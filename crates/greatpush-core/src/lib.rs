mod archive;
mod config;
mod constants;
mod error;
mod mode;
mod package;

pub use archive::PayloadFormat;
pub use config::GreatPushConfig;
pub use constants::*;
pub use error::UpdateError;
pub use mode::{InstallMode, UpdateState};
pub use package::{
    package_dir_name, validate_package_hash, DiffManifest, LedgerRecord, PackageMetadata,
    PendingState, PendingUpdate, UpdateDescriptor,
};
