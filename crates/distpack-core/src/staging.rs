//! Private scratch directories for the packer.

use crate::error::{DistError, IoResultExt};
use crate::fsops;
use distpack_schema::native_relative_path;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A disposable directory tree removed when dropped.
#[derive(Debug)]
pub struct Staging {
    temp_dir: TempDir,
}

impl Staging {
    /// Create a fresh directory named `<prefix><random>` under `root`, or
    /// under [`crate::tmp_path`] when `root` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Io`] if the directory cannot be created.
    pub fn new(root: Option<&Path>, prefix: &str) -> Result<Self, DistError> {
        let root = root.map_or_else(crate::tmp_path, Path::to_path_buf);
        std::fs::create_dir_all(&root).io_context(|| format!("creating {}", root.display()))?;

        let temp_dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&root)
            .io_context(|| format!("creating staging directory in {}", root.display()))?;

        Ok(Self { temp_dir })
    }

    /// Root of the tree.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Resolve a manifest-style relative path inside the tree.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Logic`] for empty, absolute, or escaping paths.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, DistError> {
        native_relative_path(rel)
            .map(|p| self.path().join(p))
            .ok_or_else(|| DistError::logic(format!("invalid staged path: {rel:?}")))
    }

    /// Copy `source` to `rel` inside the tree, creating parents.
    ///
    /// # Errors
    ///
    /// Returns an error if `rel` is invalid or the copy fails.
    pub fn place(&self, source: &Path, rel: &str) -> Result<u64, DistError> {
        let dest = self.resolve(rel)?;
        fsops::copy_file(source, &dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_and_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("f.txt");
        std::fs::write(&src, "abc").unwrap();

        let root;
        {
            let staging = Staging::new(Some(tmp.path()), "distpack-stage-").unwrap();
            root = staging.path().to_path_buf();
            assert!(root.file_name().unwrap().to_string_lossy().starts_with("distpack-stage-"));
            assert_eq!(staging.place(&src, "a\\b/f.txt").unwrap(), 3);
            assert!(root.join("a/b/f.txt").is_file());
        }
        assert!(!root.exists());
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = Staging::new(Some(tmp.path()), "s").unwrap();
        assert!(staging.resolve("../evil").is_err());
        assert!(staging.resolve("/abs").is_err());
        assert!(staging.resolve("").is_err());
    }
}
