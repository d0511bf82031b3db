//! Stable hashing helpers for manifests and delivered output.

use blake3::Hasher;
use serde::Serialize;

use crate::types::RowBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        // blake3 hex(32b) is 64 hex chars
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    let out = h.finalize();
    Hash256(out.into())
}

/// Hash any serde-serializable value deterministically (via JSON).
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256, crate::error::Error> {
    let bytes = serde_json::to_vec(v).map_err(|e| crate::error::Error::Hash(e.to_string()))?;
    Ok(hash_bytes(&bytes))
}

/// Incremental digest over the row batches a consumer receives, in order.
pub struct StreamDigest {
    hasher: Hasher,
    batches: u64,
}

impl StreamDigest {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
            batches: 0,
        }
    }

    pub fn update(&mut self, batch: &RowBatch) -> Result<(), crate::error::Error> {
        let bytes = serde_json::to_vec(batch)?;
        // Length prefix keeps batch boundaries part of the digest.
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(&bytes);
        self.batches += 1;
        Ok(())
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn finalize(&self) -> Hash256 {
        Hash256(self.hasher.finalize().into())
    }
}

impl Default for StreamDigest {
    fn default() -> Self {
        Self::new()
    }
}
