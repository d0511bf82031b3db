#![forbid(unsafe_code)]
//! epochflow-core: pure data shared by every layer of the engine.
//!
//! - strongly-typed ids (`OpId`, `BufferId`)
//! - row payloads (`Scalar`, `Column`, `RowBatch`)
//! - the `DataBuffer` unit that flows between operators, tagged with a
//!   `BufferFlag` (data, end-of-epoch, end-of-stream)
//! - `EngineConfig`, hashing helpers and the `RunManifest`
//!
//! No threads, channels or I/O live here; the exec crate owns those.

pub mod buffer;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod prelude;
pub mod types;

pub use error::{Error, Result};

/// Engine version string recorded in manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
