//! In-process tar backend with optional zstd compression.
//!
//! Parameter tokens understood by [`TarZst`]:
//!
//! - `-ttar` writes a plain, uncompressed tar.
//! - `-mx=N` (or `-mxN`) sets the zstd level; `0` also means plain tar.
//!
//! Anything else is ignored, so 7-Zip style parameter strings from an
//! existing configuration are accepted unchanged. Extraction sniffs the zstd
//! magic, ignores parameters, and never replaces a file already on disk.
//!
//! Sources are taken literally when they exist, so `ext[1]` is a directory
//! and not a pattern. `<dir>/*` adds the contents of `<dir>`. Otherwise a
//! wildcard in the last component is globbed inside the literal parent.

use super::{Archiver, CompressRequest, ExtractRequest};
use crate::error::{DistError, IoResultExt};
use glob::Pattern;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// zstd frame magic number.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

const DEFAULT_LEVEL: i32 = 3;
const MAX_LEVEL: i32 = 19;

/// tar archives, zstd-compressed unless the parameters ask for plain tar.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarZst;

impl TarZst {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

/// zstd level requested by `params`, or `None` for plain tar.
fn compression_level(params: &str) -> Option<i32> {
    let mut level = Some(DEFAULT_LEVEL);
    for token in params.split_whitespace() {
        if token.eq_ignore_ascii_case("-ttar") {
            level = None;
        } else if let Some(value) = token.strip_prefix("-mx") {
            let value = value.strip_prefix('=').unwrap_or(value);
            if let Ok(n) = value.parse::<i32>() {
                level = (n > 0).then(|| n.min(MAX_LEVEL));
            }
        }
    }
    level
}

fn compile_excludes(patterns: &[String]) -> Result<Vec<Pattern>, DistError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| DistError::Archiver(format!("invalid exclude pattern {p:?}: {e}")))
        })
        .collect()
}

fn is_excluded(excludes: &[Pattern], name: &Path) -> bool {
    let file_name = name.file_name().map(Path::new).unwrap_or(name);
    excludes
        .iter()
        .any(|p| p.matches_path(file_name) || p.matches_path(name))
}

fn has_wildcard(name: &str) -> bool {
    name.contains(['*', '?', '['])
}

/// The directory named by a `<dir>/*` source.
fn contents_dir(source: &Path) -> Option<&Path> {
    if source.file_name()? != "*" {
        return None;
    }
    source
        .parent()
        .map(|dir| if dir.as_os_str().is_empty() { Path::new(".") } else { dir })
}

fn no_match(source: &Path) -> DistError {
    DistError::Archiver(format!("{}: no such file or directory", source.display()))
}

struct Appender<'a, W: Write> {
    builder: tar::Builder<W>,
    recurse: bool,
    excludes: &'a [Pattern],
}

impl<W: Write> Appender<'_, W> {
    fn add_source(&mut self, source: &Path) -> Result<(), DistError> {
        if let Some(dir) = contents_dir(source) {
            return self.add_contents(dir);
        }
        if std::fs::symlink_metadata(source).is_ok() {
            return self.add_path(source, self.recurse);
        }
        let name = source
            .file_name()
            .map(std::ffi::OsStr::to_string_lossy)
            .unwrap_or_default();
        if has_wildcard(&name) {
            return self.add_matches(source, &name);
        }
        Err(no_match(source))
    }

    /// Every entry of `dir`, subdirectories included whole.
    fn add_contents(&mut self, dir: &Path) -> Result<(), DistError> {
        let entries =
            std::fs::read_dir(dir).map_err(|e| DistError::Archiver(format!("{}: {e}", dir.display())))?;
        let mut paths = entries
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .io_context(|| format!("reading {}", dir.display()))?;
        paths.sort();
        for path in &paths {
            self.add_path(path, true)?;
        }
        Ok(())
    }

    /// Glob on the file name only; the directory part is matched literally.
    fn add_matches(&mut self, source: &Path, name: &str) -> Result<(), DistError> {
        let pattern = match source.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => format!("{}/{name}", Pattern::escape(&dir.to_string_lossy())),
            None => name.to_string(),
        };
        let matches = glob::glob(&pattern)
            .map_err(|e| DistError::Archiver(format!("invalid source pattern {pattern}: {e}")))?;
        let mut found = false;
        for entry in matches {
            let path = entry.map_err(|e| {
                let path = e.path().display().to_string();
                DistError::io(format!("reading {path}"), e.into())
            })?;
            found = true;
            self.add_path(&path, self.recurse)?;
        }
        if found { Ok(()) } else { Err(no_match(source)) }
    }

    /// Add `path` under its own file name at the archive root.
    fn add_path(&mut self, path: &Path, recurse: bool) -> Result<(), DistError> {
        let name = PathBuf::from(path.file_name().unwrap_or(path.as_os_str()));
        if is_excluded(self.excludes, &name) {
            debug!(path = %path.display(), "Excluded");
            return Ok(());
        }

        if !path.is_dir() {
            return self
                .builder
                .append_path_with_name(path, &name)
                .io_context(|| format!("archiving {}", path.display()));
        }

        self.builder
            .append_dir(&name, path)
            .io_context(|| format!("archiving {}", path.display()))?;

        let max_depth = if recurse { usize::MAX } else { 1 };
        let excludes = self.excludes;
        let walker = WalkDir::new(path)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let rel = e.path().strip_prefix(path).unwrap_or(e.path());
                !is_excluded(excludes, rel)
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                let at = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                DistError::io(format!("walking {at}"), e.into())
            })?;
            let rel = entry.path().strip_prefix(path).unwrap_or(entry.path());
            let archived = name.join(rel);
            let result = if entry.file_type().is_dir() {
                if !recurse {
                    continue;
                }
                self.builder.append_dir(&archived, entry.path())
            } else {
                self.builder.append_path_with_name(entry.path(), &archived)
            };
            result.io_context(|| format!("archiving {}", entry.path().display()))?;
        }
        Ok(())
    }
}

fn write_archive<W: Write>(writer: W, request: &CompressRequest<'_>) -> Result<W, DistError> {
    let excludes = compile_excludes(request.exclude)?;
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    let mut appender = Appender {
        builder,
        recurse: request.recurse,
        excludes: &excludes,
    };
    for source in request.sources {
        appender.add_source(source)?;
    }
    appender
        .builder
        .into_inner()
        .io_context(|| format!("finishing {}", request.archive.display()))
}

/// Reject absolute paths and `..` so entries cannot land outside `dest`.
fn safe_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

fn unpack<R: Read>(reader: R, request: &ExtractRequest<'_>) -> Result<(), DistError> {
    let archive_err =
        |e: std::io::Error| DistError::Archiver(format!("{}: {e}", request.archive.display()));

    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let raw = entry.path().map_err(archive_err)?.into_owned();
        let Some(rel) = safe_relative(&raw) else {
            return Err(DistError::Archiver(format!(
                "{}: unsafe entry path {}",
                request.archive.display(),
                raw.display()
            )));
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = request.dest.join(&rel);

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&target).io_context(|| format!("creating {}", target.display()))?;
            continue;
        }

        if std::fs::symlink_metadata(&target).is_ok() {
            debug!(path = %target.display(), "Keeping existing file");
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).io_context(|| format!("creating {}", parent.display()))?;
        }
        entry
            .unpack(&target)
            .io_context(|| format!("unpacking {}", target.display()))?;
    }
    Ok(())
}

impl Archiver for TarZst {
    #[instrument(skip(self, request), fields(archive = %request.archive.display()))]
    fn compress(&self, request: &CompressRequest<'_>) -> Result<(), DistError> {
        if let Some(parent) = request.archive.parent() {
            std::fs::create_dir_all(parent).io_context(|| format!("creating {}", parent.display()))?;
        }
        let file = File::create(request.archive)
            .io_context(|| format!("creating {}", request.archive.display()))?;
        let writer = BufWriter::new(file);

        let mut writer = match compression_level(request.params) {
            Some(level) => {
                debug!(level, "Writing zstd-compressed tar");
                let encoder = zstd::stream::Encoder::new(writer, level)
                    .io_context(|| "initializing zstd encoder")?;
                write_archive(encoder, request)?
                    .finish()
                    .io_context(|| format!("finishing {}", request.archive.display()))?
            }
            None => {
                debug!("Writing plain tar");
                write_archive(writer, request)?
            }
        };
        writer
            .flush()
            .io_context(|| format!("writing {}", request.archive.display()))
    }

    #[instrument(skip(self, request), fields(archive = %request.archive.display()))]
    fn extract(&self, request: &ExtractRequest<'_>) -> Result<(), DistError> {
        std::fs::create_dir_all(request.dest)
            .io_context(|| format!("creating {}", request.dest.display()))?;

        let file = File::open(request.archive)
            .io_context(|| format!("opening {}", request.archive.display()))?;
        let mut reader = BufReader::new(file);
        let compressed = reader
            .fill_buf()
            .io_context(|| format!("reading {}", request.archive.display()))?
            .starts_with(&ZSTD_MAGIC);

        if compressed {
            let decoder = zstd::stream::read::Decoder::with_buffer(reader)
                .io_context(|| "initializing zstd decoder")?;
            unpack(decoder, request)
        } else {
            unpack(reader, request)
        }
    }

    fn archive_extension(&self) -> &'static str {
        "tar.zst"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn tree(root: &Path) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        files.sort();
        files
    }

    fn pack(archive: &Path, sources: &[PathBuf], params: &str, recurse: bool, exclude: &[String]) {
        TarZst
            .compress(&CompressRequest {
                archive,
                sources,
                params,
                recurse,
                exclude,
            })
            .unwrap();
    }

    fn unpack_to(archive: &Path, dest: &Path) {
        TarZst
            .extract(&ExtractRequest {
                archive,
                dest,
                params: "",
            })
            .unwrap();
    }

    #[test]
    fn level_parsing() {
        assert_eq!(compression_level(""), Some(DEFAULT_LEVEL));
        assert_eq!(compression_level("-ttar"), None);
        assert_eq!(compression_level("-t7z -mx=9 -mmt=2"), Some(9));
        assert_eq!(compression_level("-mx5"), Some(5));
        assert_eq!(compression_level("-mx=0"), None);
        assert_eq!(compression_level("-mx=22"), Some(MAX_LEVEL));
    }

    #[test]
    fn directory_round_trip_keeps_top_level_name() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("tree");
        write(&src.join("a.txt"), "a");
        write(&src.join("sub/b.txt"), "b");
        let archive = tmp.path().join("out.tar.zst");

        pack(&archive, &[src], "", true, &[]);
        let head = fs::read(&archive).unwrap();
        assert!(head.starts_with(&ZSTD_MAGIC));

        let dest = tmp.path().join("dest");
        unpack_to(&archive, &dest);
        assert_eq!(tree(&dest), ["tree/a.txt", "tree/sub/b.txt"]);
    }

    #[test]
    fn non_recursive_takes_top_level_files_only() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("tree");
        write(&src.join("a.txt"), "a");
        write(&src.join("sub/b.txt"), "b");
        let archive = tmp.path().join("out.tar");

        pack(&archive, &[src], "-ttar", false, &[]);
        let dest = tmp.path().join("dest");
        unpack_to(&archive, &dest);
        assert_eq!(tree(&dest), ["tree/a.txt"]);
    }

    #[test]
    fn plain_tar_has_no_zstd_header() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("one.txt");
        write(&src, "1");
        let archive = tmp.path().join("out.tar");
        pack(&archive, &[src], "-ttar", true, &[]);
        assert!(!fs::read(&archive).unwrap().starts_with(&ZSTD_MAGIC));
    }

    #[test]
    fn exclusions_match_names_and_prune_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("tree");
        write(&src.join("keep.txt"), "k");
        write(&src.join("drop.bak"), "d");
        write(&src.join("cache/inner.txt"), "c");
        write(&src.join("sub/deep.bak"), "d");
        let archive = tmp.path().join("out.tar");

        let exclude = vec!["*.bak".to_string(), "cache".to_string()];
        pack(&archive, &[src], "-ttar", true, &exclude);
        let dest = tmp.path().join("dest");
        unpack_to(&archive, &dest);
        assert_eq!(tree(&dest), ["tree/keep.txt"]);
    }

    #[test]
    fn wildcard_adds_directory_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("stage");
        write(&src.join("x.txt"), "x");
        write(&src.join("d/y.txt"), "y");
        let archive = tmp.path().join("out.tar.zst");

        pack(&archive, &[crate::archiver::contents_of(&src)], "-mx=1", false, &[]);
        let dest = tmp.path().join("dest");
        unpack_to(&archive, &dest);
        assert_eq!(tree(&dest), ["d/y.txt", "x.txt"]);
    }

    #[test]
    fn brackets_in_directory_names_are_literal() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("ext[1]");
        write(&src.join("a.txt"), "a");
        write(&src.join("b.log"), "b");
        write(&src.join("sub/c.txt"), "c");
        let dest = tmp.path().join("dest");

        let archive = tmp.path().join("literal.tar");
        pack(&archive, &[src.clone()], "-ttar", true, &[]);
        unpack_to(&archive, &dest.join("literal"));
        assert_eq!(
            tree(&dest.join("literal")),
            ["ext[1]/a.txt", "ext[1]/b.log", "ext[1]/sub/c.txt"]
        );

        let archive = tmp.path().join("contents.tar");
        pack(&archive, &[crate::archiver::contents_of(&src)], "-ttar", false, &[]);
        unpack_to(&archive, &dest.join("contents"));
        assert_eq!(tree(&dest.join("contents")), ["a.txt", "b.log", "sub/c.txt"]);

        let archive = tmp.path().join("pattern.tar");
        pack(&archive, &[src.join("*.txt")], "-ttar", true, &[]);
        unpack_to(&archive, &dest.join("pattern"));
        assert_eq!(tree(&dest.join("pattern")), ["a.txt"]);
    }

    #[test]
    fn unmatched_sources_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("dir[x]");
        write(&src.join("a.txt"), "a");

        let sources = [
            src.join("*.none"),
            crate::archiver::contents_of(&tmp.path().join("absent")),
        ];
        for source in sources {
            let err = TarZst
                .compress(&CompressRequest {
                    archive: &tmp.path().join("out.tar"),
                    sources: &[source],
                    params: "-ttar",
                    recurse: true,
                    exclude: &[],
                })
                .unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::ExternalTool);
        }
    }

    #[test]
    fn skip_existing_preserves_files() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("f.txt");
        write(&src, "new");
        let archive = tmp.path().join("out.tar");
        pack(&archive, &[src], "-ttar", true, &[]);

        let dest = tmp.path().join("dest");
        write(&dest.join("f.txt"), "old");
        unpack_to(&archive, &dest);
        assert_eq!(fs::read_to_string(dest.join("f.txt")).unwrap(), "old");
    }

    #[test]
    fn missing_source_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = TarZst
            .compress(&CompressRequest {
                archive: &tmp.path().join("out.tar"),
                sources: &[tmp.path().join("absent")],
                params: "",
                recurse: true,
                exclude: &[],
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ExternalTool);
    }

    #[test]
    fn garbage_archive_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bad.tar.zst");
        let mut bytes = ZSTD_MAGIC.to_vec();
        bytes.extend_from_slice(b"definitely not a zstd frame");
        fs::write(&archive, bytes).unwrap();
        let result = TarZst.extract(&ExtractRequest {
            archive: &archive,
            dest: &tmp.path().join("dest"),
            params: "",
        });
        assert!(result.is_err());
    }
}
