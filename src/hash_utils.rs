//! Hash utilities for attachment checksum handling

use std::fmt;

use sha2::{Digest as ShaDigest, Sha256, Sha512};

/// Hash algorithms the manifest may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Sha512,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha512 => "SHA-512",
        };
        write!(f, "{}", name)
    }
}

impl HashAlgorithm {
    /// Parses an algorithm name as found in the manifest; `None` for
    /// anything this crate does not know.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().replace('-', "").as_str() {
            "MD5" => Some(HashAlgorithm::Md5),
            "SHA256" => Some(HashAlgorithm::Sha256),
            "SHA512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Only MD5 digests may be written as the embedded-file `/CheckSum`
    /// parameter; that parameter is defined as an MD5 digest.
    pub fn supports_checksum_param(self) -> bool {
        matches!(self, HashAlgorithm::Md5)
    }

    /// Digest length in bytes
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

/// Hashes a byte slice with the given algorithm, returning the hex digest.
pub fn hash_bytes(data: &[u8], algo: HashAlgorithm) -> String {
    match algo {
        HashAlgorithm::Md5 => hex::encode(md5::compute(data).0),
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            hex::encode(hasher.finalize())
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            hasher.update(data);
            hex::encode(hasher.finalize())
        }
    }
}

/// Decodes a hex digest into raw bytes, checking its length against the
/// algorithm. `None` when the digest is malformed.
pub fn decode_digest(digest: &str, algo: HashAlgorithm) -> Option<Vec<u8>> {
    let bytes = hex::decode(digest.trim()).ok()?;
    (bytes.len() == algo.digest_len()).then_some(bytes)
}

/// Verifies content against an expected hex digest.
pub fn verify_hash(data: &[u8], expected: &str, algo: HashAlgorithm) -> bool {
    hash_bytes(data, algo).eq_ignore_ascii_case(expected)
}
