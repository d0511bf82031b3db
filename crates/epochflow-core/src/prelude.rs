//! Convenient re-exports for downstream crates.

pub use crate::buffer::{BufferFlag, DataBuffer};
pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::hash::{Hash256, StreamDigest};
pub use crate::id::{BufferId, OpId};
pub use crate::manifest::{ManifestId, RunManifest};
pub use crate::types::{Column, RowBatch, Scalar};
