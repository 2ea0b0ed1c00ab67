use thiserror::Error;

/// Failures that abort a download or install outright.
///
/// These travel inside `anyhow::Error`; callers that need to tell them apart
/// use `err.downcast_ref::<UpdateError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("received a diff update for '{hash}', but there is no current package to diff against")]
    DiffWithoutBase { hash: String },

    #[error(
        "update '{hash}' is invalid: a bundle file named \"{bundle_file_name}\" could not be found within the downloaded contents"
    )]
    MissingBundle {
        hash: String,
        bundle_file_name: String,
    },

    #[error("update '{hash}' is invalid: the downloaded payload is empty")]
    UnrecognizedPayload { hash: String },

    #[error("update '{hash}' is invalid: diff manifest could not be parsed: {reason}")]
    InvalidDiffManifest { hash: String, reason: String },

    #[error(
        "package directory '{dir_name}' already holds installed package '{existing}', refusing to reuse it for '{hash}'"
    )]
    HashCollision {
        hash: String,
        existing: String,
        dir_name: String,
    },

    #[error("invalid package hash: '{0}'")]
    InvalidPackageHash(String),

    #[error("update package has no hash")]
    MissingPackageHash,
}

impl UpdateError {
    /// Errors that reject an update as unusable and mark its hash as failed.
    pub fn is_invalid_update(&self) -> bool {
        matches!(
            self,
            Self::DiffWithoutBase { .. }
                | Self::MissingBundle { .. }
                | Self::UnrecognizedPayload { .. }
                | Self::InvalidDiffManifest { .. }
        )
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Option<&Self> {
        err.chain().find_map(|cause| cause.downcast_ref::<Self>())
    }
}
