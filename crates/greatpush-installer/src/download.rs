use anyhow::{anyhow, Context, Result};
use greatpush_core::DOWNLOAD_BUFFER_SIZE;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Zero when the source does not know the payload size.
    pub total_bytes: u64,
    pub received_bytes: u64,
}

impl DownloadProgress {
    pub fn is_completed(&self) -> bool {
        self.total_bytes > 0 && self.received_bytes >= self.total_bytes
    }
}

/// Transport that writes the payload behind `url` to `destination`.
///
/// `progress` may be called any number of times, including zero.
pub trait PayloadSource: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &mut dyn FnMut(DownloadProgress),
    ) -> Result<()>;
}

/// Reads payloads from plain paths and `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePayloadSource;

impl FilePayloadSource {
    pub fn local_path(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
    }
}

impl PayloadSource for FilePayloadSource {
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &mut dyn FnMut(DownloadProgress),
    ) -> Result<()> {
        let source = Self::local_path(url);
        let file = File::open(&source)
            .with_context(|| format!("failed to open payload: {}", source.display()))?;
        let total = file
            .metadata()
            .with_context(|| format!("failed to stat payload: {}", source.display()))?
            .len();
        copy_with_progress(file, destination, total, progress)?;
        Ok(())
    }
}

/// Streams `reader` into `destination`, reporting after every chunk.
///
/// With a non-zero `total_bytes`, a short or long read is an error.
pub fn copy_with_progress(
    mut reader: impl Read,
    destination: &Path,
    total_bytes: u64,
    progress: &mut dyn FnMut(DownloadProgress),
) -> Result<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFFER_SIZE, file);
    let mut buffer = vec![0_u8; DOWNLOAD_BUFFER_SIZE];
    let mut received_bytes = 0_u64;

    loop {
        let read = reader
            .read(&mut buffer)
            .context("failed to read payload stream")?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .with_context(|| format!("failed to write {}", destination.display()))?;
        received_bytes += read as u64;
        progress(DownloadProgress {
            total_bytes,
            received_bytes,
        });
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", destination.display()))?;

    if total_bytes > 0 && received_bytes != total_bytes {
        return Err(anyhow!(
            "received {received_bytes} bytes, expected {total_bytes}"
        ));
    }
    Ok(received_bytes)
}
