//! Plug-in interfaces for the generic operators.
//!
//! `SourceOp` iterates a `DataSource`; `MapOp` applies a `Kernel` to every
//! data buffer it sees. Both are synchronous and run on the operator's worker
//! threads.

use epochflow_core::types::RowBatch;
use epochflow_exec::ExecError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("execution error: {0}")]
    Exec(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("source error: {0}")]
    Source(String),
}

impl OpError {
    pub(crate) fn into_source(self, op: String) -> ExecError {
        ExecError::Source {
            op,
            message: self.to_string(),
        }
    }

    pub(crate) fn into_kernel(self, op: String) -> ExecError {
        ExecError::Kernel {
            op,
            message: self.to_string(),
        }
    }
}

/// Restartable iteration over some underlying data.
pub trait DataSource: Send + 'static {
    fn name(&self) -> &'static str;

    /// Next batch of the current pass; `None` once the pass is exhausted.
    fn next_batch(&mut self) -> Result<Option<RowBatch>, OpError>;

    /// Restart from the beginning of the data.
    fn rewind(&mut self) -> Result<(), OpError>;
}

/// Row transformation applied per data buffer.
///
/// Invariant: `compute` must be deterministic given the same input.
pub trait Kernel: Send + Sync + 'static {
    /// Human-readable kernel name (stable).
    fn name(&self) -> &'static str;

    fn compute(&self, input: RowBatch) -> Result<RowBatch, OpError>;
}
