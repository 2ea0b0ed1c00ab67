use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

const ZIP_LOCAL_FILE_HEADER: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const ZIP_EMPTY_ARCHIVE_HEADER: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];

/// What a downloaded payload turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Archive,
    RawBundle,
    Unrecognized,
}

impl PayloadFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::RawBundle => "raw-bundle",
            Self::Unrecognized => "unrecognized",
        }
    }

    /// Classifies a payload from its leading bytes.
    pub fn from_header(header: &[u8]) -> Self {
        if header.is_empty() {
            return Self::Unrecognized;
        }
        if header.len() >= 4
            && (header[..4] == ZIP_LOCAL_FILE_HEADER || header[..4] == ZIP_EMPTY_ARCHIVE_HEADER)
        {
            return Self::Archive;
        }
        Self::RawBundle
    }

    /// Reads at most four bytes of `path`; never modifies it.
    pub fn probe(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open payload: {}", path.display()))?;
        let mut header = Vec::with_capacity(4);
        file.take(4)
            .read_to_end(&mut header)
            .with_context(|| format!("failed to read payload header: {}", path.display()))?;
        Ok(Self::from_header(&header))
    }
}
