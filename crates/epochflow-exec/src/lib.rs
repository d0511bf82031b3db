#![forbid(unsafe_code)]
//! epochflow-exec: the pull-based execution layer.
//!
//! - `Connector`: bounded, striped hand-off between an operator's worker
//!   threads and the threads consuming its output.
//! - `DatasetOp` + `OpBase`: the capability interface every operator
//!   implements (threaded or inlined, leaf or control).
//! - `ExecutionTree`: owns the operator graph, runs the preparation pass
//!   (flag propagation and leaf discovery for control operators), launches
//!   worker threads and drives the root.
//!
//! All suspension happens on connector push/pop; cancellation goes through
//! one `ShutdownSignal` per tree.

pub mod connector;
pub mod error;
pub mod flags;
pub mod metrics;
pub mod op;
pub mod prepare;
pub mod shutdown;
pub mod tree;

pub use connector::Connector;
pub use error::{ExecError, Result};
pub use flags::{ControlFlags, OpState, PrepareFlags};
pub use op::{DatasetOp, OpBase};
pub use prepare::PrepareContext;
pub use shutdown::ShutdownSignal;
pub use tree::{ExecutionTree, TreeState};
