//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded capacity of every connector lane. A full lane blocks its producer.
    pub connector_queue_size: usize,

    /// Worker count for threaded operators that do not specify their own.
    pub num_parallel_workers: usize,

    /// Rows per data buffer for generated sources.
    pub rows_per_buffer: usize,

    /// Optional seed recorded in the run manifest for replay.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connector_queue_size: 16,
            num_parallel_workers: 4,
            rows_per_buffer: 64,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `EPOCHFLOW_CONNECTOR_QUEUE_SIZE`: per-lane connector capacity
    /// - `EPOCHFLOW_NUM_PARALLEL_WORKERS`: default worker count
    /// - `EPOCHFLOW_ROWS_PER_BUFFER`: rows per generated buffer
    /// - `EPOCHFLOW_SEED`: seed recorded in the manifest
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("EPOCHFLOW_CONNECTOR_QUEUE_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.connector_queue_size = v;
            }
        }

        if let Ok(s) = std::env::var("EPOCHFLOW_NUM_PARALLEL_WORKERS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.num_parallel_workers = v;
            }
        }

        if let Ok(s) = std::env::var("EPOCHFLOW_ROWS_PER_BUFFER") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.rows_per_buffer = v;
            }
        }

        if let Ok(s) = std::env::var("EPOCHFLOW_SEED") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.seed = Some(v);
            }
        }

        cfg
    }

    /// Reject settings that would leave a connector or worker pool empty.
    pub fn validate(&self) -> Result<()> {
        if self.connector_queue_size == 0 {
            return Err(Error::Config(
                "connector_queue_size must be greater than 0".into(),
            ));
        }
        if self.num_parallel_workers == 0 {
            return Err(Error::Config(
                "num_parallel_workers must be greater than 0".into(),
            ));
        }
        if self.rows_per_buffer == 0 {
            return Err(Error::Config("rows_per_buffer must be greater than 0".into()));
        }
        Ok(())
    }
}
