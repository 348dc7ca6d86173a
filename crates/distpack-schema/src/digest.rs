//! 128-bit integrity digests for the manifest trailer.
//!
//! MD5 keeps manifests byte-compatible with those written by earlier
//! releases of the packer. BLAKE3 (truncated to 16 bytes) is available for
//! new deployments where both sides are configured alike.

use serde::{Deserialize, Serialize};

use crate::DIGEST_LEN;

/// Hash function used for the manifest trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// MD5, the historical trailer digest.
    #[default]
    Md5,
    /// First 16 bytes of a BLAKE3 hash.
    Blake3,
}

impl DigestAlgorithm {
    /// Compute the 16-byte trailer digest of `data`.
    pub fn compute(self, data: &[u8]) -> [u8; DIGEST_LEN] {
        match self {
            Self::Md5 => md5::compute(data).0,
            Self::Blake3 => {
                let full = blake3::hash(data);
                let mut out = [0u8; DIGEST_LEN];
                out.copy_from_slice(&full.as_bytes()[..DIGEST_LEN]);
                out
            }
        }
    }

    /// Lowercase hex rendering of the digest of `data`.
    pub fn compute_hex(self, data: &[u8]) -> String {
        hex::encode(self.compute(data))
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}
