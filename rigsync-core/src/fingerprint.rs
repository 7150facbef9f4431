//! Content fingerprints for animation payloads.
//!
//! A fingerprint is an opaque string handed out by the counterpart server.
//! Two equal fingerprints mean the animation has not changed; anything else
//! is treated as a change and triggers a re-fetch.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque content hash summarizing an animation payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps a hash string received over the wire.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Computes the fingerprint of a raw payload (lowercase hex SHA-256).
    pub fn of(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Returns true if the server's fingerprint differs from the last one we applied.
///
/// A missing `last` fingerprint always counts as changed so the first poll
/// fetches the animation.
pub fn has_changed(last: Option<&Fingerprint>, server: &Fingerprint) -> bool {
    match last {
        Some(last) => last != server,
        None => true,
    }
}
