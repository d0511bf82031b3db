#![forbid(unsafe_code)]
//! epochflow-operators: the concrete operators of the engine.
//!
//! - `RepeatOp`: inlined epoch controller that replays its subtree.
//! - `SourceOp`: threaded leaf over a restartable `DataSource`.
//! - `MapOp`: threaded, multi-worker transformation applying a `Kernel`.
//!
//! Operators are plain structs implementing `epochflow_exec::DatasetOp`; the
//! execution tree owns them behind `Arc<dyn DatasetOp>`.

pub mod kernels;
pub mod map;
pub mod repeat;
pub mod source;
pub mod traits;

pub use kernels::{CmpOp, FilterRows, RenameColumns};
pub use map::MapOp;
pub use repeat::{RepeatOp, RepeatOpBuilder, INFINITE_REPEAT};
pub use source::{MemorySource, RangeSource, SourceOp};
pub use traits::{DataSource, Kernel, OpError};
