//! Filesystem primitives shared by the packer and installer.

use crate::error::{DistError, IoResultExt};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// First wait between deletion attempts.
const RETRY_START: Duration = Duration::from_millis(100);
/// Longest wait between deletion attempts.
const RETRY_CAP: Duration = Duration::from_secs(1);
/// Paths shorter than this are never removed recursively.
const MIN_REMOVABLE_LEN: usize = 4;

/// Relative paths (with `/` separators) of every regular file under `root`.
///
/// Sorted, so registration order is stable across platforms.
///
/// # Errors
///
/// Returns [`DistError::Io`] if the walk fails or a name is not valid
/// Unicode.
pub fn snapshot(root: &Path) -> Result<BTreeSet<String>, DistError> {
    let mut files = BTreeSet::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| DistError::io(format!("walking {}", root.display()), e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let mut parts = Vec::new();
        for component in rel.components() {
            let part = component.as_os_str().to_str().ok_or_else(|| {
                DistError::io(
                    format!("snapshot of {}", root.display()),
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("non-Unicode file name: {}", entry.path().display()),
                    ),
                )
            })?;
            parts.push(part);
        }
        files.insert(parts.join("/"));
    }
    Ok(files)
}

/// Size of a file in bytes.
///
/// # Errors
///
/// Returns [`DistError::Io`] if the file cannot be inspected.
pub fn file_size(path: &Path) -> Result<u64, DistError> {
    Ok(std::fs::metadata(path)
        .io_context(|| format!("inspecting {}", path.display()))?
        .len())
}

/// Copy a file, creating missing parent directories of `dst`. Returns the
/// number of bytes copied.
///
/// # Errors
///
/// Returns [`DistError::Io`] if a directory cannot be created or the copy
/// fails.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64, DistError> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).io_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::copy(src, dst).io_context(|| format!("copying {} -> {}", src.display(), dst.display()))
}

/// Remove a directory tree, continuing past individual failures.
///
/// Refuses paths shorter than four characters. Returns `true` when the path
/// no longer exists afterwards.
pub fn remove_tree_best_effort(path: &Path) -> bool {
    if path.as_os_str().len() < MIN_REMOVABLE_LEN {
        warn!(path = %path.display(), "Refusing to remove suspiciously short path");
        return false;
    }
    if std::fs::symlink_metadata(path).is_err() {
        return true;
    }

    for entry in WalkDir::new(path).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot walk {}: {e}", path.display());
                continue;
            }
        };
        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        if let Err(e) = result {
            warn!("Failed to remove {}: {e}", entry.path().display());
        }
    }

    let gone = std::fs::symlink_metadata(path).is_err();
    if gone {
        debug!(path = %path.display(), "Removed tree");
    }
    gone
}

/// Delete a file (or directory tree), retrying with capped exponential
/// backoff until it is gone or `timeout` elapses.
///
/// # Errors
///
/// Returns [`DistError::Io`] with the last failure if the path still exists
/// after `timeout`.
pub fn delete_with_retry(path: &Path, timeout: Duration) -> Result<(), DistError> {
    let start = Instant::now();
    let mut wait = RETRY_START;
    loop {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        let err = match result {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => e,
        };

        if start.elapsed() >= timeout {
            return Err(DistError::io(
                format!("deleting {} (gave up after {timeout:?})", path.display()),
                err,
            ));
        }
        debug!(path = %path.display(), ?wait, "Delete failed, retrying: {err}");
        std::thread::sleep(wait.min(timeout.saturating_sub(start.elapsed())));
        wait = (wait * 2).min(RETRY_CAP);
    }
}
