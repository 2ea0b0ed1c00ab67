use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Moves a file, falling back to copy-and-delete across file systems.
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    remove_file_if_exists(dst)
        .with_context(|| format!("failed to replace {}", dst.display()))?;

    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    fs::remove_file(src).with_context(|| format!("failed to remove {}", src.display()))?;
    Ok(())
}

/// Copies every file under `src` into `dst`, replacing same-named files.
///
/// `skip` receives `/`-separated paths relative to `src`; returning true
/// leaves that file (or directory) out.
pub fn merge_dir_into(src: &Path, dst: &Path, skip: &dyn Fn(&str) -> bool) -> Result<()> {
    merge_dir_recursive(src, src, dst, skip)
}

fn merge_dir_recursive(
    root: &Path,
    current: &Path,
    dst_root: &Path,
    skip: &dyn Fn(&str) -> bool,
) -> Result<()> {
    fs::create_dir_all(dst_root)
        .with_context(|| format!("failed to create {}", dst_root.display()))?;
    for entry in
        fs::read_dir(current).with_context(|| format!("failed to read {}", current.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let rel = rel_slash_path(root, &path)?;
        if skip(&rel) {
            continue;
        }

        let metadata = fs::symlink_metadata(&path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        let dst_path = dst_root.join(&rel);
        if metadata.is_dir() {
            fs::create_dir_all(&dst_path)
                .with_context(|| format!("failed to create {}", dst_path.display()))?;
            merge_dir_recursive(root, &path, dst_root, skip)?;
            continue;
        }

        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        if fs::symlink_metadata(&dst_path).is_ok_and(|existing| existing.is_dir()) {
            fs::remove_dir_all(&dst_path)
                .with_context(|| format!("failed to replace {}", dst_path.display()))?;
        }

        #[cfg(unix)]
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&path)
                .with_context(|| format!("failed to read symlink {}", path.display()))?;
            remove_file_if_exists(&dst_path)
                .with_context(|| format!("failed to replace {}", dst_path.display()))?;
            std::os::unix::fs::symlink(&target, &dst_path).with_context(|| {
                format!(
                    "failed to create symlink {} -> {}",
                    dst_path.display(),
                    target.display()
                )
            })?;
            continue;
        }

        fs::copy(&path, &dst_path).with_context(|| {
            format!(
                "failed to copy {} to {}",
                path.display(),
                dst_path.display()
            )
        })?;
    }
    Ok(())
}

pub(crate) fn rel_slash_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("failed to relativize {}", path.display()))?;
    let parts = rel
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    Ok(parts.join("/"))
}
