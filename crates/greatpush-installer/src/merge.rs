use anyhow::{anyhow, Context, Result};
use greatpush_core::{
    DiffManifest, PayloadFormat, UpdateError, DIFF_MANIFEST_FILE_NAME, PACKAGE_FILE_NAME,
};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::fs_utils::{merge_dir_into, move_file, rel_slash_path, remove_dir_if_exists};
use crate::UpdateLayout;

/// Unpacks an archive payload into a directory.
pub trait ArchiveExtractor: Send + Sync {
    fn extract(&self, archive: &Path, dst: &Path) -> Result<()>;
}

/// Extracts with the platform's archive tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandExtractor;

impl ArchiveExtractor for CommandExtractor {
    fn extract(&self, archive: &Path, dst: &Path) -> Result<()> {
        extract_zip(archive, dst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// The payload was the bundle file itself.
    RawBundle,
    Full,
    Diff,
}

impl UpdateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawBundle => "raw-bundle",
            Self::Full => "full",
            Self::Diff => "diff",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedPackage {
    pub kind: UpdateKind,
    pub relative_bundle_path: String,
}

/// Rebuilds a complete package tree from a downloaded payload.
pub struct DiffMerger<'a> {
    layout: &'a UpdateLayout,
    extractor: &'a dyn ArchiveExtractor,
}

impl<'a> DiffMerger<'a> {
    pub fn new(layout: &'a UpdateLayout, extractor: &'a dyn ArchiveExtractor) -> Self {
        Self { layout, extractor }
    }

    /// Consumes `staging_file` and fills `new_dir`.
    ///
    /// `current_dir` is the installed package a diff payload is applied to.
    pub fn merge(
        &self,
        hash: &str,
        staging_file: &Path,
        new_dir: &Path,
        current_dir: Option<&Path>,
        bundle_file_name: &str,
    ) -> Result<MergedPackage> {
        match PayloadFormat::probe(staging_file)? {
            PayloadFormat::Unrecognized => Err(UpdateError::UnrecognizedPayload {
                hash: hash.to_string(),
            }
            .into()),
            PayloadFormat::RawBundle => {
                move_file(staging_file, &new_dir.join(bundle_file_name))?;
                info!(hash, "applying raw bundle update");
                Ok(MergedPackage {
                    kind: UpdateKind::RawBundle,
                    relative_bundle_path: bundle_file_name.to_string(),
                })
            }
            PayloadFormat::Archive => {
                let scratch = self.layout.unzipped_dir();
                let result = self.merge_archive(
                    hash,
                    staging_file,
                    &scratch,
                    new_dir,
                    current_dir,
                    bundle_file_name,
                );
                if let Err(err) = remove_dir_if_exists(&scratch) {
                    warn!(path = %scratch.display(), error = %err, "failed to remove unzip scratch directory");
                }
                result
            }
        }
    }

    fn merge_archive(
        &self,
        hash: &str,
        staging_file: &Path,
        scratch: &Path,
        new_dir: &Path,
        current_dir: Option<&Path>,
        bundle_file_name: &str,
    ) -> Result<MergedPackage> {
        remove_dir_if_exists(scratch)
            .with_context(|| format!("failed to reset {}", scratch.display()))?;
        fs::create_dir_all(scratch)
            .with_context(|| format!("failed to create {}", scratch.display()))?;
        self.extractor
            .extract(staging_file, scratch)
            .with_context(|| format!("failed to extract update '{hash}'"))?;
        fs::remove_file(staging_file)
            .with_context(|| format!("failed to remove {}", staging_file.display()))?;

        let manifest_path = scratch.join(DIFF_MANIFEST_FILE_NAME);
        let kind = if manifest_path.is_file() {
            let Some(current_dir) = current_dir else {
                return Err(UpdateError::DiffWithoutBase {
                    hash: hash.to_string(),
                }
                .into());
            };
            let raw = fs::read_to_string(&manifest_path)
                .with_context(|| format!("failed to read {}", manifest_path.display()))?;
            let manifest =
                DiffManifest::from_json_str(&raw).map_err(|err| UpdateError::InvalidDiffManifest {
                    hash: hash.to_string(),
                    reason: format!("{err:#}"),
                })?;

            merge_dir_into(current_dir, new_dir, &|rel: &str| {
                rel == PACKAGE_FILE_NAME || manifest.deletes(rel)
            })?;
            fs::remove_file(&manifest_path)
                .with_context(|| format!("failed to remove {}", manifest_path.display()))?;
            UpdateKind::Diff
        } else {
            UpdateKind::Full
        };

        merge_dir_into(scratch, new_dir, &|_: &str| false)?;

        let relative_bundle_path =
            find_bundle(new_dir, bundle_file_name)?.ok_or_else(|| UpdateError::MissingBundle {
                hash: hash.to_string(),
                bundle_file_name: bundle_file_name.to_string(),
            })?;

        info!(hash, kind = kind.as_str(), bundle = %relative_bundle_path, "applying update");
        Ok(MergedPackage {
            kind,
            relative_bundle_path,
        })
    }
}

/// Locates `bundle_file_name` under `root`, returning a `/`-separated path.
///
/// Breadth-first: the shallowest match wins, and matches at the same depth
/// are ordered by their relative path.
pub fn find_bundle(root: &Path, bundle_file_name: &str) -> Result<Option<String>> {
    let mut queue = VecDeque::from([root.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let mut entries = fs::read_dir(&dir)
            .with_context(|| format!("failed to read {}", dir.display()))?
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("failed to read {}", dir.display()))?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut subdirs: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("failed to stat {}", path.display()))?;
            if file_type.is_dir() {
                subdirs.push(path);
                continue;
            }
            if entry.file_name() == OsString::from(bundle_file_name) {
                return rel_slash_path(root, &path).map(Some);
            }
        }
        queue.extend(subdirs);
    }
    Ok(None)
}

fn extract_zip(archive_path: &Path, dst: &Path) -> Result<()> {
    if cfg!(windows) {
        let mut command = Command::new("powershell");
        command.arg("-NoProfile").arg("-Command").arg(format!(
            "Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
            escape_ps_single_quote(archive_path),
            escape_ps_single_quote(dst)
        ));
        if run_command(
            &mut command,
            "failed to extract zip archive with powershell",
        )
        .is_ok()
        {
            return Ok(());
        }
    }

    let mut unzip_command = Command::new("unzip");
    unzip_command
        .arg("-q")
        .arg("-o")
        .arg(archive_path)
        .arg("-d")
        .arg(dst);
    if run_command(
        &mut unzip_command,
        "failed to extract zip archive with unzip",
    )
    .is_ok()
    {
        return Ok(());
    }

    run_command(
        Command::new("tar")
            .arg("-xf")
            .arg(archive_path)
            .arg("-C")
            .arg(dst),
        "failed to extract zip archive with tar fallback",
    )
}

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

fn escape_ps_single_quote(path: &Path) -> String {
    let mut os = OsString::new();
    os.push(path.as_os_str());
    os.to_string_lossy().replace('\'', "''")
}
