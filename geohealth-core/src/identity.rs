//! Caller identity helpers.
//!
//! The limiter and the webhook store key their state by a hashed credential,
//! never by a raw API key. Unauthenticated callers share one fixed identity.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Identity shared by every unauthenticated caller.
pub const ANONYMOUS_IDENTITY: &str = "__anonymous__";

/// SHA-256 hex digest of an API key.
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)
}

fn is_prehashed(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Set of accepted API key hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptedKeys {
    hashes: HashSet<String>,
}

impl AcceptedKeys {
    /// Parse a comma-separated key list.
    ///
    /// 64-character hex entries are taken as already hashed; anything else is
    /// hashed on load. Blank entries are ignored.
    pub fn parse(list: &str) -> Self {
        let hashes = list
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| {
                if is_prehashed(k) {
                    k.to_ascii_lowercase()
                } else {
                    hash_api_key(k)
                }
            })
            .collect();
        Self { hashes }
    }

    /// Hash `raw_key` and return the hash if it is accepted.
    pub fn authenticate(&self, raw_key: &str) -> Option<String> {
        let hashed = hash_api_key(raw_key);
        self.hashes.contains(&hashed).then_some(hashed)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
