//! Digest algorithms and the ByteRange digest driver.

use crate::domain::constants;
use crate::infra::error::{SignError, SignResult};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::str::FromStr;

/// Supported digest algorithms. SHA-1 is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn digest_size(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// OID content bytes for the AlgorithmIdentifier.
    pub fn oid(&self) -> &'static [u8] {
        match self {
            DigestAlgorithm::Sha256 => constants::OID_SHA256,
            DigestAlgorithm::Sha384 => constants::OID_SHA384,
            DigestAlgorithm::Sha512 => constants::OID_SHA512,
        }
    }

    /// Resolve an AlgorithmIdentifier OID found in a CMS structure.
    pub fn from_oid(oid: &[u8]) -> SignResult<Self> {
        match oid {
            o if o == constants::OID_SHA256 => Ok(DigestAlgorithm::Sha256),
            o if o == constants::OID_SHA384 => Ok(DigestAlgorithm::Sha384),
            o if o == constants::OID_SHA512 => Ok(DigestAlgorithm::Sha512),
            o if o == constants::OID_SHA1 => {
                Err(SignError::UnsupportedDigest("sha1".to_string()))
            }
            other => Err(SignError::UnsupportedDigest(format!(
                "OID {}",
                hex::encode(other)
            ))),
        }
    }

    pub fn message_digest(&self) -> openssl::hash::MessageDigest {
        match self {
            DigestAlgorithm::Sha256 => openssl::hash::MessageDigest::sha256(),
            DigestAlgorithm::Sha384 => openssl::hash::MessageDigest::sha384(),
            DigestAlgorithm::Sha512 => openssl::hash::MessageDigest::sha512(),
        }
    }

    /// One-shot digest.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = ByteRangeDigest::new(*self);
        hasher.update(data);
        hasher.finish()
    }
}

impl FromStr for DigestAlgorithm {
    type Err = SignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "sha384" | "sha-384" => Ok(DigestAlgorithm::Sha384),
            "sha512" | "sha-512" => Ok(DigestAlgorithm::Sha512),
            other => Err(SignError::UnsupportedDigest(other.to_string())),
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

enum HashState {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

/// Incremental hash fed with the two ByteRange halves in order.
pub struct ByteRangeDigest {
    state: HashState,
}

impl ByteRangeDigest {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let state = match algorithm {
            DigestAlgorithm::Sha256 => HashState::Sha256(Sha256::new()),
            DigestAlgorithm::Sha384 => HashState::Sha384(Sha384::new()),
            DigestAlgorithm::Sha512 => HashState::Sha512(Sha512::new()),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HashState::Sha256(h) => h.update(data),
            HashState::Sha384(h) => h.update(data),
            HashState::Sha512(h) => h.update(data),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        match self.state {
            HashState::Sha256(h) => h.finalize().to_vec(),
            HashState::Sha384(h) => h.finalize().to_vec(),
            HashState::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Hash `[offset, offset+len)` pairs of `bytes` through one hash instance.
/// The spans are fed in the order given; out-of-bounds spans are malformed.
pub fn digest_byte_ranges(
    algorithm: DigestAlgorithm,
    bytes: &[u8],
    ranges: &[(usize, usize)],
) -> SignResult<Vec<u8>> {
    let mut hasher = ByteRangeDigest::new(algorithm);
    for &(offset, len) in ranges {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                SignError::MalformedPdf(format!(
                    "byte range [{offset}, {len}] exceeds file of {} bytes",
                    bytes.len()
                ))
            })?;
        hasher.update(&bytes[offset..end]);
    }
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_properties() {
        assert_eq!(DigestAlgorithm::Sha256.digest_size(), 32);
        assert_eq!(DigestAlgorithm::Sha384.digest_size(), 48);
        assert_eq!(DigestAlgorithm::Sha512.digest_size(), 64);
        assert_eq!("sha384".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha384);
    }

    #[test]
    fn sha1_is_refused() {
        assert!(matches!(
            "sha1".parse::<DigestAlgorithm>(),
            Err(SignError::UnsupportedDigest(_))
        ));
        assert!(matches!(
            DigestAlgorithm::from_oid(crate::domain::constants::OID_SHA1),
            Err(SignError::UnsupportedDigest(_))
        ));
    }

    #[test]
    fn ranged_digest_equals_concatenated_digest() {
        let bytes = b"0123456789abcdef";
        let split = digest_byte_ranges(DigestAlgorithm::Sha256, bytes, &[(0, 4), (10, 6)]).unwrap();

        let mut concatenated = Vec::new();
        concatenated.extend_from_slice(&bytes[0..4]);
        concatenated.extend_from_slice(&bytes[10..16]);
        assert_eq!(split, DigestAlgorithm::Sha256.digest(&concatenated));
    }

    #[test]
    fn out_of_bounds_range_is_malformed() {
        let err = digest_byte_ranges(DigestAlgorithm::Sha256, b"abc", &[(0, 4)]).unwrap_err();
        assert!(matches!(err, SignError::MalformedPdf(_)));
    }
}
