//! Tarball integrity checking.
//!
//! Registries publish a Subresource Integrity string per version
//! (`dist.integrity`, e.g. `sha512-<base64>`). Multiple space-separated hashes
//! are allowed; the strongest supported one is checked. Versions that only
//! carry a legacy sha1 `shasum` are accepted unverified.

use super::error::MirrorError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256, Sha512};

/// Hash algorithms supported for verification, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    fn digest(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(bytes).to_vec(),
            Self::Sha512 => Sha512::digest(bytes).to_vec(),
        }
    }
}

/// Outcome of an integrity check that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityCheck {
    Verified(Algorithm),
    /// Nothing verifiable was published for this version.
    Unverified,
}

/// Compute the SRI string of `bytes` with `algorithm`.
#[must_use]
pub fn sri(algorithm: Algorithm, bytes: &[u8]) -> String {
    format!("{}-{}", algorithm.as_str(), STANDARD.encode(algorithm.digest(bytes)))
}

/// Check `bytes` against a published SRI string.
///
/// # Errors
/// Returns an integrity mismatch error when the strongest supported hash in
/// `integrity` does not match `bytes`.
pub fn verify(url: &str, bytes: &[u8], integrity: Option<&str>) -> Result<IntegrityCheck, MirrorError> {
    let Some(integrity) = integrity else {
        return Ok(IntegrityCheck::Unverified);
    };

    let strongest = integrity
        .split_whitespace()
        .filter_map(|entry| {
            let (prefix, encoded) = entry.split_once('-')?;
            let algorithm = Algorithm::from_prefix(prefix)?;
            // Options (`sha512-...?foo`) are allowed by SRI and ignored.
            let encoded = encoded.split('?').next().unwrap_or(encoded);
            let expected = STANDARD.decode(encoded).ok()?;
            Some((algorithm, expected, entry))
        })
        .max_by_key(|(algorithm, _, _)| *algorithm);

    let Some((algorithm, expected, entry)) = strongest else {
        return Ok(IntegrityCheck::Unverified);
    };

    if algorithm.digest(bytes) == expected {
        Ok(IntegrityCheck::Verified(algorithm))
    } else {
        Err(MirrorError::integrity_mismatch(url, entry, &sri(algorithm, bytes)))
    }
}
