//! Build-side packer.
//!
//! Files are staged into a private directory and attributed to fake
//! directories in the manifest. [`Packer::finalize`] compresses the staging
//! tree into one package archive and writes the manifest next to it.
//!
//! # Workflow
//!
//! ```text
//! begin_fake_dir("$INSTDIR")      -> current = 0
//!   add_tree(...) / add_file(...) -> staged + recorded under 0
//! begin_fake_dir("$PLUGINSDIR")   -> current = 1
//!   ...
//! finalize(out_dir)               -> install_<n>.<ext> + install.distinfo
//! ```

use crate::archiver::{Archiver, CompressRequest, ExtractRequest, contents_of};
use crate::config::{PackConfig, PackPlan, PreExtractPlugin};
use crate::error::{DistError, IoResultExt};
use crate::fsops;
use crate::staging::Staging;
use distpack_schema::{Manifest, native_relative_path};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Parameters for the intermediate archive used to pull a subtree into staging.
const INCORPORATE_PARAMS: &str = "-ttar";

/// Exclusive upper bound of the random package name suffix.
const PACKAGE_SUFFIX_RANGE: u32 = 100_000;

/// Random names tried before giving up on a crowded output directory.
const MAX_NAME_ATTEMPTS: usize = 1_000;

/// Files produced by [`Packer::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackOutput {
    /// Package archive path.
    pub package_path: PathBuf,
    /// Package archive file name, as recorded in the manifest.
    pub package_name: String,
    /// Manifest path.
    pub manifest_path: PathBuf,
    /// Plugins that were exploded and recorded.
    pub plugins: usize,
    /// Total files across all fake directories.
    pub files: usize,
}

/// Accumulates files into fake directories and emits package + manifest.
#[derive(Debug)]
pub struct Packer<A: Archiver> {
    archiver: A,
    config: PackConfig,
    staging: Staging,
    scratch: Staging,
    manifest: Manifest,
    current: Option<usize>,
    finalized: bool,
}

impl<A: Archiver> Packer<A> {
    /// Create a packer with fresh staging and scratch directories.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Io`] if the directories cannot be created.
    pub fn new(archiver: A, config: PackConfig) -> Result<Self, DistError> {
        let root = config.staging_root.as_deref();
        let staging = Staging::new(root, "distpack-stage-")?;
        let scratch = Staging::new(root, "distpack-scratch-")?;
        debug!(staging = %staging.path().display(), "Packer ready");

        Ok(Self {
            archiver,
            config,
            staging,
            scratch,
            manifest: Manifest::new(),
            current: None,
            finalized: false,
        })
    }

    /// Staging directory holding every added file.
    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    /// Manifest built so far.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Index of the fake directory receiving additions.
    pub fn current_fake_dir(&self) -> Option<usize> {
        self.current
    }

    /// Whether [`Packer::finalize`] has been called.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn ensure_open(&self) -> Result<(), DistError> {
        if self.finalized {
            return Err(DistError::logic("packer is already finalized"));
        }
        Ok(())
    }

    fn target(&self) -> Result<usize, DistError> {
        self.ensure_open()?;
        self.current
            .ok_or_else(|| DistError::logic("no fake directory has been started"))
    }

    /// Start a new fake directory; later additions are recorded under it.
    ///
    /// # Errors
    ///
    /// Returns an error after finalize, or if the manifest cannot grow. On
    /// failure no fake directory is current.
    pub fn begin_fake_dir(&mut self, name: &str) -> Result<usize, DistError> {
        self.ensure_open()?;
        match self.manifest.add_fake_dir(name) {
            Ok(index) => {
                info!(index, name, "Fake directory");
                self.current = Some(index);
                Ok(index)
            }
            Err(e) => {
                self.current = None;
                Err(e.into())
            }
        }
    }

    /// Stage a file or directory tree and record every file it adds.
    ///
    /// The source goes through an intermediate tar in the scratch directory
    /// and is unpacked into staging without overwriting. Files that were not
    /// in staging before are recorded under the current fake directory.
    /// Returns the sum of their sizes, counting empty files as one byte.
    ///
    /// # Errors
    ///
    /// Returns an error without a current fake directory, after finalize, or
    /// if archiving, snapshotting, or recording fails. A new staged path that
    /// could not be installed again (a drive prefix) is a [`DistError::Logic`].
    #[instrument(skip(self, exclude), fields(source = %source.display()))]
    pub fn add_tree(&mut self, source: &Path, recurse: bool, exclude: &[String]) -> Result<u64, DistError> {
        let index = self.target()?;
        let before = fsops::snapshot(self.staging.path())?;

        let tar = self.scratch.path().join("incoming.tar");
        let sources = [source.to_path_buf()];
        self.archiver.compress(&CompressRequest {
            archive: &tar,
            sources: &sources,
            params: INCORPORATE_PARAMS,
            recurse,
            exclude,
        })?;
        let extracted = self.archiver.extract(&ExtractRequest {
            archive: &tar,
            dest: self.staging.path(),
            params: INCORPORATE_PARAMS,
        });
        match std::fs::remove_file(&tar) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!("Failed to remove {}: {e}", tar.display());
            }
            _ => {}
        }
        extracted?;

        let after = fsops::snapshot(self.staging.path())?;
        let fresh: Vec<&String> = after.difference(&before).collect();
        if let Some(rel) = fresh.iter().find(|rel| native_relative_path(rel).is_none()) {
            return Err(DistError::logic(format!("cannot record staged path {rel:?}")));
        }

        let mut total = 0u64;
        let mut added = 0usize;
        for rel in fresh {
            let size = fsops::file_size(&self.staging.path().join(rel))?;
            self.manifest.add_file(index, rel.as_str())?;
            total += size.max(1);
            added += 1;
        }
        info!(files = added, bytes = total, "Added tree");
        Ok(total)
    }

    /// Copy one file into staging as `name` and record it.
    ///
    /// Returns the file size, counting an empty file as one byte.
    ///
    /// # Errors
    ///
    /// Returns an error without a current fake directory, after finalize, for
    /// an invalid `name`, or if the copy fails.
    #[instrument(skip(self), fields(source = %source.display()))]
    pub fn add_file(&mut self, source: &Path, name: &str) -> Result<u64, DistError> {
        let index = self.target()?;
        let size = self.staging.place(source, name)?;
        self.manifest.add_file(index, name)?;
        debug!(bytes = size, "Added file");
        Ok(size.max(1))
    }

    /// Apply a [`PackPlan`]: one fake directory per plan entry, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing step.
    pub fn apply_plan(&mut self, plan: &PackPlan) -> Result<u64, DistError> {
        let mut total = 0;
        for dir in &plan.dirs {
            self.begin_fake_dir(&dir.name)?;
            for entry in &dir.entries {
                total += match &entry.name {
                    Some(name) => self.add_file(&entry.source, name)?,
                    None => self.add_tree(&entry.source, entry.recurse, &entry.exclude)?,
                };
            }
        }
        Ok(total)
    }

    /// Explode configured plugins in staging into their marker directories.
    fn explode_plugins(&self) -> Result<Vec<PreExtractPlugin>, DistError> {
        let timeout = Duration::from_millis(self.config.delete_timeout_ms);
        let mut exploded = Vec::new();

        for plugin in &self.config.pre_extract_plugins {
            let Some(rel) = native_relative_path(&plugin.path) else {
                warn!(path = %plugin.path, "Skipping pre-extract plugin with invalid path");
                continue;
            };
            let original = self.staging.path().join(&rel);
            if !original.is_file() {
                warn!(path = %plugin.path, "Pre-extract plugin not staged, skipping");
                continue;
            }

            let marker = crate::marker_dir(self.staging.path(), &rel);
            std::fs::create_dir_all(&marker).io_context(|| format!("creating {}", marker.display()))?;
            self.archiver.extract(&ExtractRequest {
                archive: &original,
                dest: &marker,
                params: &plugin.compress_param,
            })?;
            fsops::delete_with_retry(&original, timeout)?;

            info!(path = %plugin.path, "Exploded pre-extract plugin");
            exploded
                .try_reserve(1)
                .map_err(|_| distpack_schema::ManifestError::Allocation("plugin list"))?;
            exploded.push(plugin.clone());
        }
        Ok(exploded)
    }

    fn choose_package_name(&self, out_dir: &Path) -> Result<String, DistError> {
        free_package_name(
            out_dir,
            &self.config.package_prefix,
            self.archiver.archive_extension(),
            PACKAGE_SUFFIX_RANGE,
        )
    }

    /// Compress staging into `out_dir/<prefix><n>.<ext>` and write the
    /// manifest to `out_dir/<manifest_name>`.
    ///
    /// Configured pre-extract plugins present in staging are exploded first
    /// and recorded in the manifest; missing ones are skipped with a warning.
    /// Only the first call does any work: the packer is marked finalized
    /// before anything else happens, so a failed or repeated call cannot be
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns [`DistError::Logic`] on a second call, otherwise the first
    /// failing step.
    #[instrument(skip(self), fields(out_dir = %out_dir.display()))]
    pub fn finalize(&mut self, out_dir: &Path) -> Result<PackOutput, DistError> {
        if self.finalized {
            return Err(DistError::logic("finalize called more than once"));
        }
        self.finalized = true;

        std::fs::create_dir_all(out_dir).io_context(|| format!("creating {}", out_dir.display()))?;

        let exploded = self.explode_plugins()?;

        let package_name = self.choose_package_name(out_dir)?;
        let package_path = out_dir.join(&package_name);
        let sources = [contents_of(self.staging.path())];
        self.archiver.compress(&CompressRequest {
            archive: &package_path,
            sources: &sources,
            params: &self.config.compress_param,
            recurse: false,
            exclude: &[],
        })?;

        self.manifest.set_package_name(package_name.as_str());
        for plugin in &exploded {
            self.manifest.add_plugin(plugin.path.as_str(), plugin.compress_param.as_str())?;
        }

        let manifest_path = out_dir.join(&self.config.manifest_name);
        self.manifest.save(&manifest_path, self.config.digest)?;

        info!(
            package = %package_path.display(),
            dirs = self.manifest.dirs().len(),
            files = self.manifest.file_count(),
            plugins = exploded.len(),
            "Package written"
        );

        Ok(PackOutput {
            package_path,
            package_name,
            manifest_path,
            plugins: exploded.len(),
            files: self.manifest.file_count(),
        })
    }
}

/// `<prefix><n>.<ext>` with `n` drawn from `0..range`, not yet present in
/// `out_dir`.
fn free_package_name(out_dir: &Path, prefix: &str, extension: &str, range: u32) -> Result<String, DistError> {
    let mut rng = rand::rng();
    for _ in 0..MAX_NAME_ATTEMPTS {
        let name = format!("{prefix}{}.{extension}", rng.random_range(0..range));
        if !out_dir.join(&name).exists() {
            return Ok(name);
        }
    }
    Err(DistError::logic(format!(
        "no free package name in {} after {MAX_NAME_ATTEMPTS} attempts",
        out_dir.display()
    )))
}
