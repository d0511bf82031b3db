#![forbid(unsafe_code)]
//! epochflow-planner: from a (YAML) linear pipeline to an `ExecutionTree`.
//!
//! - `dsl::yaml` parses and structurally validates the pipeline document;
//! - `lower` resolves the engine config and instantiates one operator per
//!   step, each step becoming the parent of the previous one.

pub mod dsl;
pub mod error;
pub mod lower;

pub use dsl::yaml::{parse_yaml_pipeline, ParsedPipeline, Pipeline, PipelineConfig, Step};
pub use error::{PlanError, Result};
pub use lower::{build_tree, resolve_config};
