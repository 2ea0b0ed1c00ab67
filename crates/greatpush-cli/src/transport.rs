use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};
use greatpush_installer::{copy_with_progress, DownloadProgress, FilePayloadSource, PayloadSource};
use sha2::{Digest, Sha256};

pub(crate) fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Fetches `http(s)` payloads with reqwest and anything else from disk.
pub(crate) struct CliPayloadSource {
    client: reqwest::blocking::Client,
}

impl CliPayloadSource {
    pub(crate) fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("greatpush/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

impl PayloadSource for CliPayloadSource {
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &mut dyn FnMut(DownloadProgress),
    ) -> Result<()> {
        if !is_http_url(url) {
            return FilePayloadSource.fetch(url, destination, progress);
        }

        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("failed to request {url}"))?
            .error_for_status()
            .with_context(|| format!("update server rejected {url}"))?;
        let total = response.content_length().unwrap_or(0);
        copy_with_progress(response, destination, total, progress)
            .with_context(|| format!("failed to download {url}"))?;
        Ok(())
    }
}

pub(crate) fn sha256_file(path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    sha256_reader(file).with_context(|| format!("failed to hash {}", path.display()))
}

fn sha256_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
