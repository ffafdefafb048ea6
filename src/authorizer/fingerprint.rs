//! Token fingerprints
//!
//! Raw bearer tokens never leave the authorizer: the store is keyed by the
//! lowercase hex SHA-256 digest of the token bytes.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Lowercase hex SHA-256 digest of a raw token.
///
/// Deserialization goes through [`Fingerprint::from_hex`], so a value that is
/// not a 64-character hex digest is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex length of a SHA-256 digest
    pub const LEN: usize = 64;

    /// Fingerprint raw token bytes.
    #[must_use]
    pub fn of(raw: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_ref());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap a precomputed digest. Returns `None` unless it is 64 hex characters.
    #[must_use]
    pub fn from_hex(hex_digest: &str) -> Option<Self> {
        let normalized = hex_digest.trim().to_ascii_lowercase();
        (normalized.len() == Self::LEN && normalized.bytes().all(|b| b.is_ascii_hexdigit()))
            .then_some(Self(normalized))
    }

    /// The hex digest
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value).ok_or_else(|| {
            Error::Config(format!(
                "fingerprint must be {} hex characters, got {}",
                Self::LEN,
                value.len()
            ))
        })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
