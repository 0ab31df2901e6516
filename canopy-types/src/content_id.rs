// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque, self-describing handle identifying a block in the content-addressed DAG.
///
/// The concrete hashing scheme is an implementation detail of the (out-of-scope) block store;
/// `ContentId` only needs to be orderable, hashable, and able to verify that a byte slice hashes
/// to itself, since those are the only operations the tree state performs on it directly.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

const MULTIHASH_PREFIX: &str = "sha256-";

impl ContentId {
    /// Computes the content id for a block's raw bytes.
    pub fn for_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        ContentId(format!("{MULTIHASH_PREFIX}{}", hex::encode(digest)))
    }

    /// Verifies that `bytes` hashes to this content id.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        Self::for_bytes(bytes) == *self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes backing the longest-common-prefix computation used by the replica selector.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl FromStr for ContentId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ContentId(s.to_string()))
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        ContentId(s)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        ContentId(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_roundtrip() {
        let id = ContentId::for_bytes(b"hello world");
        assert!(id.verify(b"hello world"));
        assert!(!id.verify(b"goodbye world"));
    }

    #[test]
    fn deterministic_across_calls() {
        assert_eq!(ContentId::for_bytes(b"x"), ContentId::for_bytes(b"x"));
    }
}
