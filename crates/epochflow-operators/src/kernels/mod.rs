//! Row kernels applied by `MapOp`.

pub mod filter;
pub mod rename;

pub use filter::{CmpOp, FilterRows};
pub use rename::RenameColumns;
