//! Run manifest emitted after a tree has been drained to end-of-stream.
//!
//! Two runs over identical sources and config produce the same
//! `outputs_digest`, which makes the manifest usable for replay checks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub id: ManifestId,

    /// Engine version string for provenance.
    pub engine_version: String,

    /// Seed from the engine config, if any.
    pub seed: Option<u64>,

    /// Data buffers delivered at the root.
    pub buffers: u64,

    /// Rows delivered at the root.
    pub rows: u64,

    /// End-of-epoch markers delivered at the root.
    pub epochs: u64,

    /// Digest over every delivered row batch, in delivery order.
    pub outputs_digest: Option<Hash256>,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl RunManifest {
    pub fn new(seed: Option<u64>, started_ms: u64) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            engine_version: crate::VERSION.to_string(),
            seed,
            buffers: 0,
            rows: 0,
            epochs: 0,
            outputs_digest: None,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64, outputs_digest: Option<Hash256>) -> Self {
        self.finished_ms = finished_ms;
        self.outputs_digest = outputs_digest;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_ms.saturating_sub(self.started_ms)
    }
}
