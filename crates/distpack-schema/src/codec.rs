//! Binary encoding and decoding of [`Manifest`].
//!
//! Decoding verifies the trailer digest before looking at any structure, so a
//! corrupted file is rejected as a whole and never yields a partially trusted
//! manifest.

use std::fs;
use std::path::Path;

use crate::cursor::{Cursor, Writer};
use crate::digest::DigestAlgorithm;
use crate::error::ManifestError;
use crate::model::{FakeDir, Manifest, Plugin, normalize_separators};
use crate::{BLOCK_HEADER_LEN, DIGEST_LEN, FORMAT_VERSION, HEADER_LEN, MAGIC};

/// Block types understood by this version of the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    /// Fake directories and their member files.
    Dirs = 0x01,
    /// Pre-extract plugins.
    Plugins = 0x02,
    /// File name of the package archive.
    PackageName = 0x03,
}

impl BlockType {
    /// Map a raw type byte to a known block type.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Dirs),
            0x02 => Some(Self::Plugins),
            0x03 => Some(Self::PackageName),
            _ => None,
        }
    }
}

/// Smallest encoded directory record: name length + file count.
const MIN_DIR_RECORD: usize = 8;
/// Smallest encoded string: its length prefix.
const MIN_STRING: usize = 4;
/// Smallest encoded plugin record: two empty strings.
const MIN_PLUGIN_RECORD: usize = 8;

impl Manifest {
    /// Encode the manifest, appending the trailer digest.
    ///
    /// Blocks are written in fixed order: directories, plugins, then the
    /// package name if one is set. Path-like strings are written with `\`
    /// separators; plugin parameters are written verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::TooLarge`] if any count, string, or block
    /// exceeds the 32-bit length fields.
    pub fn to_bytes(&self, digest: DigestAlgorithm) -> Result<Vec<u8>, ManifestError> {
        let mut out = Writer::new();
        out.put_bytes(&MAGIC);
        out.put_u32(FORMAT_VERSION);

        let mut dirs = Writer::new();
        dirs.put_len("directory count", self.dirs.len())?;
        for dir in &self.dirs {
            dirs.put_wide_string("directory name", &normalize_separators(&dir.name))?;
            dirs.put_len("file count", dir.files.len())?;
            for file in &dir.files {
                dirs.put_wide_string("file path", &normalize_separators(file))?;
            }
        }
        out.put_block(BlockType::Dirs as u8, dirs.as_bytes())?;

        let mut plugins = Writer::new();
        plugins.put_len("plugin count", self.plugins.len())?;
        for plugin in &self.plugins {
            plugins.put_wide_string("plugin path", &normalize_separators(&plugin.path))?;
            plugins.put_wide_string("plugin parameter", &plugin.compress_param)?;
        }
        out.put_block(BlockType::Plugins as u8, plugins.as_bytes())?;

        if let Some(name) = &self.package_name {
            let mut block = Writer::new();
            block.put_wide_string("package name", &normalize_separators(name))?;
            out.put_block(BlockType::PackageName as u8, block.as_bytes())?;
        }

        let trailer = digest.compute(out.as_bytes());
        out.put_bytes(&trailer);
        Ok(out.into_bytes())
    }

    /// Decode a manifest from bytes produced by [`Manifest::to_bytes`].
    ///
    /// # Errors
    ///
    /// Fails if the buffer is too short, the digest does not match, the
    /// header is wrong, or any field would read outside its block.
    pub fn from_bytes(bytes: &[u8], digest: DigestAlgorithm) -> Result<Self, ManifestError> {
        let min = HEADER_LEN + DIGEST_LEN;
        if bytes.len() < min {
            return Err(ManifestError::TooShort {
                len: bytes.len(),
                min,
            });
        }

        let (payload, stored) = bytes.split_at(bytes.len() - DIGEST_LEN);
        let computed = digest.compute(payload);
        if computed[..] != stored[..] {
            return Err(ManifestError::DigestMismatch {
                expected: hex::encode(stored),
                actual: hex::encode(computed),
            });
        }

        let mut cur = Cursor::new(payload);
        let magic = cur.read_bytes("magic", MAGIC.len())?;
        if magic != MAGIC {
            return Err(ManifestError::BadMagic([magic[0], magic[1], magic[2], magic[3]]));
        }
        let version = cur.read_u32("version")?;
        if version != FORMAT_VERSION {
            return Err(ManifestError::UnsupportedVersion(version));
        }

        let mut dirs = None;
        let mut plugins = None;
        let mut package_name = None;

        while !cur.is_empty() {
            let block_type = cur.read_u8("block type")?;
            let len = cur.read_u32("block length")? as usize;
            let mut block = cur.take("block payload", len)?;

            match BlockType::from_u8(block_type) {
                Some(BlockType::Dirs) => {
                    ensure_first(dirs.is_none(), block_type)?;
                    dirs = Some(decode_dirs(&mut block)?);
                }
                Some(BlockType::Plugins) => {
                    ensure_first(plugins.is_none(), block_type)?;
                    plugins = Some(decode_plugins(&mut block)?);
                }
                Some(BlockType::PackageName) => {
                    ensure_first(package_name.is_none(), block_type)?;
                    package_name = Some(block.read_wide_string("package name")?);
                }
                None => {
                    tracing::debug!(
                        "skipping unknown manifest block type {block_type} ({len} bytes)"
                    );
                    continue;
                }
            }

            if !block.is_empty() {
                return Err(ManifestError::TrailingBytes {
                    block_type,
                    offset: block.offset(),
                    extra: block.remaining(),
                });
            }
        }

        Ok(Self {
            dirs: dirs.unwrap_or_default(),
            plugins: plugins.unwrap_or_default(),
            package_name,
        })
    }

    /// Encode and write the manifest to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an encoding error or [`ManifestError::Io`] if the write fails.
    pub fn save(&self, path: &Path, digest: DigestAlgorithm) -> Result<(), ManifestError> {
        let bytes = self.to_bytes(digest)?;
        fs::write(path, bytes).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read and decode the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file cannot be read, or any
    /// decoding error from [`Manifest::from_bytes`].
    pub fn load(path: &Path, digest: DigestAlgorithm) -> Result<Self, ManifestError> {
        let bytes = fs::read(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(&bytes, digest)
    }
}

fn ensure_first(first: bool, block_type: u8) -> Result<(), ManifestError> {
    if first {
        Ok(())
    } else {
        Err(ManifestError::DuplicateBlock(block_type))
    }
}

fn decode_dirs(block: &mut Cursor<'_>) -> Result<Vec<FakeDir>, ManifestError> {
    let count = block.read_u32("directory count")? as usize;
    let mut dirs = Vec::with_capacity(count.min(block.max_records(MIN_DIR_RECORD)));
    for _ in 0..count {
        let name = block.read_wide_string("directory name")?;
        let file_count = block.read_u32("file count")? as usize;
        let mut files = Vec::with_capacity(file_count.min(block.max_records(MIN_STRING)));
        for _ in 0..file_count {
            files.push(block.read_wide_string("file path")?);
        }
        dirs.push(FakeDir { name, files });
    }
    Ok(dirs)
}

fn decode_plugins(block: &mut Cursor<'_>) -> Result<Vec<Plugin>, ManifestError> {
    let count = block.read_u32("plugin count")? as usize;
    let mut plugins = Vec::with_capacity(count.min(block.max_records(MIN_PLUGIN_RECORD)));
    for _ in 0..count {
        let path = block.read_wide_string("plugin path")?;
        let compress_param = block.read_wide_string("plugin parameter")?;
        plugins.push(Plugin {
            path,
            compress_param,
        });
    }
    Ok(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Offset just past the block starting at `offset` in an encoded manifest.
    fn block_end(bytes: &[u8], offset: usize) -> Option<usize> {
        let len_bytes = bytes.get(offset + 1..offset + BLOCK_HEADER_LEN)?;
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        Some(offset + BLOCK_HEADER_LEN + len as usize)
    }

    const ALGO: DigestAlgorithm = DigestAlgorithm::Md5;

    fn sample() -> Manifest {
        let mut m = Manifest::new();
        let a = m.add_fake_dir("$1").unwrap();
        m.add_file(a, "fake1_rec1/inner/deep.txt").unwrap();
        m.add_file(a, "fake1_1.txt").unwrap();
        m.add_file(a, "fake12txt/fake1_2o.txt").unwrap();
        let b = m.add_fake_dir("$2").unwrap();
        m.add_file(b, "ff3\\content.pkg").unwrap();
        m.add_file(b, "fake21txt\\fake2_1o.txt").unwrap();
        m.add_plugin("ff3/content.pkg", "-tzip -mx=0").unwrap();
        m.set_package_name("install_4242.7z");
        m
    }

    fn normalized(m: &Manifest) -> Manifest {
        let mut out = Manifest::new();
        for dir in m.dirs() {
            let i = out.add_fake_dir(normalize_separators(&dir.name)).unwrap();
            for f in &dir.files {
                out.add_file(i, normalize_separators(f)).unwrap();
            }
        }
        for p in m.plugins() {
            out.add_plugin(normalize_separators(&p.path), p.compress_param.clone())
                .unwrap();
        }
        if let Some(name) = m.package_name() {
            out.set_package_name(normalize_separators(name));
        }
        out
    }

    /// Re-seal a hand-edited payload with a fresh trailer.
    fn reseal(payload: &[u8]) -> Vec<u8> {
        let mut out = payload.to_vec();
        out.extend_from_slice(&ALGO.compute(payload));
        out
    }

    #[test]
    fn round_trip_preserves_fields() {
        let m = sample();
        let bytes = m.to_bytes(ALGO).unwrap();
        let decoded = Manifest::from_bytes(&bytes, ALGO).unwrap();
        assert_eq!(decoded, normalized(&m));
        assert_eq!(decoded.dirs()[0].files[0], "fake1_rec1\\inner\\deep.txt");
        assert_eq!(decoded.plugins()[0].compress_param, "-tzip -mx=0");
        assert_eq!(decoded.package_name(), Some("install_4242.7z"));
    }

    #[test]
    fn round_trip_empty_manifest() {
        let m = Manifest::new();
        let bytes = m.to_bytes(ALGO).unwrap();
        // header + two empty blocks (5 + 4 each) + digest
        assert_eq!(bytes.len(), HEADER_LEN + 2 * (BLOCK_HEADER_LEN + 4) + DIGEST_LEN);
        let decoded = Manifest::from_bytes(&bytes, ALGO).unwrap();
        assert_eq!(decoded, m);
        assert_eq!(decoded.package_name(), None);
    }

    #[test]
    fn round_trip_blake3() {
        let m = sample();
        let bytes = m.to_bytes(DigestAlgorithm::Blake3).unwrap();
        let decoded = Manifest::from_bytes(&bytes, DigestAlgorithm::Blake3).unwrap();
        assert_eq!(decoded, normalized(&m));
        // A reader configured for a different digest rejects the file.
        assert!(matches!(
            Manifest::from_bytes(&bytes, DigestAlgorithm::Md5),
            Err(ManifestError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn exact_layout_of_small_manifest() {
        let mut m = Manifest::new();
        let i = m.add_fake_dir("d").unwrap();
        m.add_file(i, "a/b").unwrap();
        let bytes = m.to_bytes(ALGO).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(b"XNSI");
        expected.extend_from_slice(&2u32.to_le_bytes());
        // dirs block: count(4) + name(4+2) + file_count(4) + path(4+6) = 24
        expected.push(0x01);
        expected.extend_from_slice(&24u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&[b'd', 0]);
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&3u32.to_le_bytes());
        expected.extend_from_slice(&[b'a', 0, b'\\', 0, b'b', 0]);
        // plugins block: empty
        expected.push(0x02);
        expected.extend_from_slice(&4u32.to_le_bytes());
        expected.extend_from_slice(&0u32.to_le_bytes());
        let digest = ALGO.compute(&expected);
        expected.extend_from_slice(&digest);

        assert_eq!(bytes, expected);
    }

    #[test]
    fn any_flipped_byte_fails_integrity() {
        let bytes = sample().to_bytes(ALGO).unwrap();
        for i in 0..bytes.len() - DIGEST_LEN {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0xFF;
            match Manifest::from_bytes(&corrupted, ALGO) {
                Err(ManifestError::DigestMismatch { .. }) => {}
                other => panic!("byte {i}: expected digest mismatch, got {other:?}"),
            }
        }
    }

    #[test]
    fn every_truncation_fails_cleanly() {
        let bytes = sample().to_bytes(ALGO).unwrap();
        for len in 0..bytes.len() {
            let result = Manifest::from_bytes(&bytes[..len], ALGO);
            assert!(result.is_err(), "truncation to {len} bytes was accepted");
        }
    }

    #[test]
    fn truncated_payload_with_valid_digest_is_a_bounds_error() {
        let bytes = sample().to_bytes(ALGO).unwrap();
        let payload = &bytes[..bytes.len() - DIGEST_LEN];
        let dirs_end = block_end(payload, HEADER_LEN).unwrap();
        let plugins_end = block_end(payload, dirs_end).unwrap();
        // Cut mid-block but keep the digest honest. Cuts exactly on a block
        // boundary are well-formed manifests with fewer blocks.
        for len in HEADER_LEN + 1..payload.len() {
            if len == dirs_end || len == plugins_end {
                continue;
            }
            let resealed = reseal(&payload[..len]);
            let err = Manifest::from_bytes(&resealed, ALGO).unwrap_err();
            assert!(
                matches!(err, ManifestError::OutOfBounds { .. }),
                "len {len}: {err:?}"
            );
        }
    }

    #[test]
    fn unknown_block_is_skipped() {
        let m = sample();
        let bytes = m.to_bytes(ALGO).unwrap();
        let payload = &bytes[..bytes.len() - DIGEST_LEN];
        let dirs_end = block_end(payload, HEADER_LEN).unwrap();

        let mut spliced = payload[..dirs_end].to_vec();
        spliced.push(0x7F);
        spliced.extend_from_slice(&6u32.to_le_bytes());
        spliced.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0xFF, 0xFF]);
        spliced.extend_from_slice(&payload[dirs_end..]);

        let decoded = Manifest::from_bytes(&reseal(&spliced), ALGO).unwrap();
        assert_eq!(decoded, normalized(&m));
    }

    #[test]
    fn unknown_block_with_oversized_length_is_rejected() {
        let payload = &Manifest::new().to_bytes(ALGO).unwrap();
        let payload = &payload[..payload.len() - DIGEST_LEN];
        let mut spliced = payload.to_vec();
        spliced.push(0x42);
        spliced.extend_from_slice(&100u32.to_le_bytes());
        spliced.extend_from_slice(&[0; 10]);
        let err = Manifest::from_bytes(&reseal(&spliced), ALGO).unwrap_err();
        assert!(matches!(err, ManifestError::OutOfBounds { field: "block payload", .. }));
    }

    #[test]
    fn bad_magic_and_version() {
        let mut payload = b"NOPE".to_vec();
        payload.extend_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            Manifest::from_bytes(&reseal(&payload), ALGO),
            Err(ManifestError::BadMagic(m)) if &m == b"NOPE"
        ));

        let mut payload = MAGIC.to_vec();
        payload.extend_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            Manifest::from_bytes(&reseal(&payload), ALGO),
            Err(ManifestError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn too_short_is_rejected_before_digest() {
        let err = Manifest::from_bytes(&[0u8; 23], ALGO).unwrap_err();
        assert!(matches!(err, ManifestError::TooShort { len: 23, min: 24 }));
    }

    #[test]
    fn string_count_past_block_end_is_rejected() {
        // A dirs block claiming one directory whose name runs past the block.
        let mut payload = MAGIC.to_vec();
        payload.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        payload.push(0x01);
        payload.extend_from_slice(&8u32.to_le_bytes());
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&50u32.to_le_bytes());
        // Bytes after the block that the name must not borrow.
        payload.push(0x7F);
        payload.extend_from_slice(&100u32.to_le_bytes());
        payload.extend_from_slice(&[0u8; 100]);
        let err = Manifest::from_bytes(&reseal(&payload), ALGO).unwrap_err();
        assert!(matches!(err, ManifestError::OutOfBounds { field: "directory name", .. }));
    }

    #[test]
    fn trailing_bytes_in_known_block_are_rejected() {
        let mut payload = MAGIC.to_vec();
        payload.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        payload.push(0x02);
        payload.extend_from_slice(&6u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&[1, 2]);
        let err = Manifest::from_bytes(&reseal(&payload), ALGO).unwrap_err();
        assert!(matches!(err, ManifestError::TrailingBytes { block_type: 2, extra: 2, .. }));
    }

    #[test]
    fn duplicate_known_block_is_rejected() {
        let bytes = Manifest::new().to_bytes(ALGO).unwrap();
        let payload = &bytes[..bytes.len() - DIGEST_LEN];
        let mut doubled = payload.to_vec();
        doubled.extend_from_slice(&payload[HEADER_LEN..]);
        let err = Manifest::from_bytes(&reseal(&doubled), ALGO).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateBlock(1)));
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(crate::DEFAULT_MANIFEST_NAME);
        let m = sample();
        m.save(&path, ALGO).unwrap();
        let loaded = Manifest::load(&path, ALGO).unwrap();
        assert_eq!(loaded, normalized(&m));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(&dir.path().join("missing"), ALGO).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
        assert!(!err.is_format());
    }
}
