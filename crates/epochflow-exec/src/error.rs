//! Execution errors.
//!
//! Three classes:
//! - configuration errors, caught while building or preparing a tree;
//! - structural/logic errors, which are fatal and never retried;
//! - runtime failures (sources, kernels, shutdown) that travel up through
//!   every `get_next_buffer` call unchanged.
//!
//! End-of-epoch is a control signal, not an error, and never shows up here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid configuration: {param} {constraint}")]
    Config {
        param: &'static str,
        constraint: String,
    },

    #[error("{op} has no child; a control operator can never be a leaf")]
    MissingChild { op: String },

    #[error("logic error: {op} is an inlined operator and cannot be launched as a thread")]
    InlinedLaunch { op: String },

    #[error("unexpected state: {0}")]
    UnexpectedState(String),

    #[error("tree construction error: {0}")]
    Structural(String),

    #[error("data source failure in {op}: {message}")]
    Source { op: String, message: String },

    #[error("kernel failure in {op}: {message}")]
    Kernel { op: String, message: String },

    #[error("worker thread of {op} panicked")]
    WorkerPanicked { op: String },

    #[error("interrupted by shutdown")]
    Interrupted,

    #[error(transparent)]
    Core(#[from] epochflow_core::Error),
}

impl ExecError {
    /// Invariant violations in tree construction or the connector protocol.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExecError::InlinedLaunch { .. }
                | ExecError::UnexpectedState(_)
                | ExecError::Structural(_)
                | ExecError::WorkerPanicked { .. }
        )
    }

    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ExecError::Config { .. } | ExecError::MissingChild { .. } | ExecError::Core(_)
        )
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        ExecError::UnexpectedState(format!("{what} lock poisoned"))
    }
}
