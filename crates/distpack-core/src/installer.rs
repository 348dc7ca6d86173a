//! Install-side resolver.
//!
//! An [`Installer`] is created from a manifest, told where each fake
//! directory really lives, and then unpacks the package and copies every
//! file into its real directory.
//!
//! ```text
//! init ──> register_real_dir* ──> extract_and_distribute ──> free
//! ```
//!
//! Real directories pair with fake directories by position: the first
//! registered directory receives the first fake directory's files, and so
//! on. Surplus entries on either side are ignored unless
//! [`InstallConfig::strict_dir_count`] is set.

use crate::archiver::{Archiver, CompressRequest, ExtractRequest, contents_of};
use crate::config::InstallConfig;
use crate::error::{DistError, IoResultExt};
use crate::fsops;
use distpack_schema::{Manifest, native_relative_path};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Lifecycle position of an [`Installer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    /// Manifest loaded; real directories may be registered.
    Initialized,
    /// Package unpacked into the work directory.
    Extracted,
    /// Files copied to their real directories.
    Distributed,
    /// Work directory released.
    Freed,
}

/// Summary of an [`Installer::extract_and_distribute`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    /// Fake/real directory pairs processed.
    pub dirs: usize,
    /// Files copied.
    pub files: usize,
    /// Bytes copied.
    pub bytes: u64,
    /// Plugins rebuilt from their marker directories.
    pub plugins: usize,
    /// Fake directories without a registered real directory.
    pub unmatched_fake: usize,
    /// Real directories without a fake directory.
    pub unmatched_real: usize,
}

/// Consumes a manifest and its package to lay files out on disk.
#[derive(Debug)]
pub struct Installer<A: Archiver> {
    archiver: A,
    config: InstallConfig,
    manifest: Manifest,
    source_dir: PathBuf,
    real_dirs: Vec<PathBuf>,
    work_dir: Option<PathBuf>,
    stage: InstallStage,
}

impl<A: Archiver> Installer<A> {
    /// Load the manifest at `manifest_path`, then delete it.
    ///
    /// The package archive is expected in the same directory as the manifest.
    /// A failure to delete the manifest is logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be read or fails validation.
    /// The file is left in place in that case.
    #[instrument(skip(archiver, config), fields(manifest = %manifest_path.display()))]
    pub fn init(manifest_path: &Path, archiver: A, config: InstallConfig) -> Result<Self, DistError> {
        let manifest = Manifest::load(manifest_path, config.digest)?;
        if let Err(e) = std::fs::remove_file(manifest_path) {
            warn!("Failed to delete manifest {}: {e}", manifest_path.display());
        }

        let source_dir = manifest_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        info!(
            dirs = manifest.dirs().len(),
            files = manifest.file_count(),
            plugins = manifest.plugins().len(),
            "Manifest loaded"
        );

        Ok(Self {
            archiver,
            config,
            manifest,
            source_dir,
            real_dirs: Vec::new(),
            work_dir: None,
            stage: InstallStage::Initialized,
        })
    }

    /// The loaded manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Package archive file name recorded in the manifest.
    pub fn package_name(&self) -> Option<&str> {
        self.manifest.package_name()
    }

    /// Current lifecycle stage.
    pub fn stage(&self) -> InstallStage {
        self.stage
    }

    /// Real directories in registration order.
    pub fn real_dirs(&self) -> &[PathBuf] {
        &self.real_dirs
    }

    /// Private work directory, once extraction has started.
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    /// Append the next real directory and return its index.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Logic`] once extraction has started, or an
    /// allocation error if the list cannot grow.
    pub fn register_real_dir(&mut self, dir: impl Into<PathBuf>) -> Result<usize, DistError> {
        if self.stage != InstallStage::Initialized {
            return Err(DistError::logic(format!(
                "cannot register directories in stage {:?}",
                self.stage
            )));
        }
        self.real_dirs
            .try_reserve(1)
            .map_err(|_| distpack_schema::ManifestError::Allocation("real directory list"))?;
        let dir = dir.into();
        debug!(index = self.real_dirs.len(), dir = %dir.display(), "Real directory");
        self.real_dirs.push(dir);
        Ok(self.real_dirs.len() - 1)
    }

    fn package_path(&self) -> Result<PathBuf, DistError> {
        let name = self
            .manifest
            .package_name()
            .ok_or_else(|| DistError::logic("manifest does not name a package archive"))?;
        let rel = native_relative_path(name)
            .ok_or_else(|| DistError::logic(format!("invalid package name in manifest: {name:?}")))?;
        Ok(self.source_dir.join(rel))
    }

    fn check_pairing(&self) -> Result<(usize, usize), DistError> {
        let fake = self.manifest.dirs().len();
        let real = self.real_dirs.len();
        if fake == real {
            return Ok((0, 0));
        }
        if self.config.strict_dir_count {
            return Err(DistError::logic(format!(
                "{real} real directories registered for {fake} fake directories"
            )));
        }
        warn!(fake, real, "Directory counts differ, surplus entries are ignored");
        Ok((fake.saturating_sub(real), real.saturating_sub(fake)))
    }

    fn create_work_dir(&self) -> Result<PathBuf, DistError> {
        let root = self.config.work_root.clone().unwrap_or_else(crate::tmp_path);
        std::fs::create_dir_all(&root).io_context(|| format!("creating {}", root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("distpack-install-")
            .tempdir_in(&root)
            .io_context(|| format!("creating work directory in {}", root.display()))?;
        // Removal is handled by `free`, which logs failures.
        Ok(dir.keep())
    }

    fn recompress_plugins(&self, work: &Path) -> Result<usize, DistError> {
        let mut rebuilt = 0;
        for plugin in self.manifest.plugins() {
            let rel = native_relative_path(&plugin.path)
                .ok_or_else(|| DistError::logic(format!("invalid plugin path in manifest: {:?}", plugin.path)))?;
            let marker = crate::marker_dir(work, &rel);
            if !marker.is_dir() {
                warn!(path = %plugin.path, "Plugin marker directory missing, skipping");
                continue;
            }
            let sources = [contents_of(&marker)];
            self.archiver.compress(&CompressRequest {
                archive: &work.join(&rel),
                sources: &sources,
                params: &plugin.compress_param,
                recurse: false,
                exclude: &[],
            })?;
            debug!(path = %plugin.path, "Rebuilt plugin");
            rebuilt += 1;
        }
        Ok(rebuilt)
    }

    fn distribute(&self, work: &Path, report: &mut DistributionReport) -> Result<(), DistError> {
        for (fake, real) in self.manifest.dirs().iter().zip(&self.real_dirs) {
            std::fs::create_dir_all(real).io_context(|| format!("creating {}", real.display()))?;
            for file in &fake.files {
                let rel = native_relative_path(file)
                    .ok_or_else(|| DistError::logic(format!("invalid file path in manifest: {file:?}")))?;
                report.bytes += fsops::copy_file(&work.join(&rel), &real.join(&rel))?;
                report.files += 1;
            }
            debug!(fake = %fake.name, real = %real.display(), files = fake.files.len(), "Distributed");
            report.dirs += 1;
        }
        Ok(())
    }

    /// Unpack the package, rebuild plugins, and copy every file of each fake
    /// directory into its paired real directory. Deletes the package archive
    /// on success.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Logic`] if called twice or, in strict mode, when
    /// directory counts differ. Otherwise returns the first failing step;
    /// the work directory is kept for [`Installer::free`].
    #[instrument(skip(self))]
    pub fn extract_and_distribute(&mut self) -> Result<DistributionReport, DistError> {
        if self.stage != InstallStage::Initialized || self.work_dir.is_some() {
            return Err(DistError::logic(format!(
                "extraction already attempted (stage {:?})",
                self.stage
            )));
        }
        let package = self.package_path()?;
        let (unmatched_fake, unmatched_real) = self.check_pairing()?;

        let work = self.create_work_dir()?;
        self.work_dir = Some(work.clone());

        self.archiver.extract(&ExtractRequest {
            archive: &package,
            dest: &work,
            params: "",
        })?;
        self.stage = InstallStage::Extracted;

        let mut report = DistributionReport {
            plugins: self.recompress_plugins(&work)?,
            unmatched_fake,
            unmatched_real,
            ..DistributionReport::default()
        };
        self.distribute(&work, &mut report)?;
        self.stage = InstallStage::Distributed;

        if let Err(e) = std::fs::remove_file(&package) {
            warn!("Failed to delete package {}: {e}", package.display());
        }

        info!(files = report.files, bytes = report.bytes, "Installed");
        Ok(report)
    }

    /// Remove the work directory. Failures are logged, never returned.
    ///
    /// Returns `true` when nothing is left behind. Safe to call repeatedly.
    pub fn free(&mut self) -> bool {
        if self.stage == InstallStage::Freed {
            return true;
        }
        self.stage = InstallStage::Freed;
        match self.work_dir.take() {
            Some(work) => fsops::remove_tree_best_effort(&work),
            None => true,
        }
    }
}

impl<A: Archiver> Drop for Installer<A> {
    fn drop(&mut self) {
        self.free();
    }
}
