//! Minimal YAML parser for *linear* pipelines.
//!
//! Example:
//! ```yaml
//! config:
//!   connector_queue_size: 8
//! steps:
//!   - op: range
//!     rows: 100
//!   - op: filter
//!     expr: "id >= 10"
//!     workers: 2
//!   - op: rename
//!     expr: "id AS key"
//!   - op: repeat
//!     count: 3
//! ```
//!
//! The first step is the source; every later step consumes the output of the
//! step before it.

use serde::{Deserialize, Serialize};

use epochflow_core::config::EngineConfig;

use crate::error::{PlanError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub config: Option<PipelineConfig>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "op")]
pub enum Step {
    /// Generated rows `0..rows` with `id` and `label` columns.
    Range {
        rows: u64,
        #[serde(default)]
        rows_per_buffer: Option<usize>,
    },

    /// Literal `I64` values in one column.
    Values {
        column: String,
        values: Vec<i64>,
        #[serde(default)]
        rows_per_buffer: Option<usize>,
    },

    Rename {
        expr: String,
        #[serde(default)]
        workers: Option<usize>,
    },

    Filter {
        expr: String,
        #[serde(default)]
        workers: Option<usize>,
    },

    Repeat {
        count: i32,
        #[serde(default)]
        forward_epoch_markers: bool,
    },
}

impl Step {
    pub fn is_source(&self) -> bool {
        matches!(self, Step::Range { .. } | Step::Values { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Range { .. } => "range",
            Step::Values { .. } => "values",
            Step::Rename { .. } => "rename",
            Step::Filter { .. } => "filter",
            Step::Repeat { .. } => "repeat",
        }
    }
}

/// Engine overrides carried by the pipeline file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub connector_queue_size: Option<usize>,
    pub num_parallel_workers: Option<usize>,
    pub rows_per_buffer: Option<usize>,
    pub seed: Option<u64>,
}

impl PipelineConfig {
    pub fn apply_to(&self, cfg: &mut EngineConfig) {
        if let Some(v) = self.connector_queue_size {
            cfg.connector_queue_size = v;
        }
        if let Some(v) = self.num_parallel_workers {
            cfg.num_parallel_workers = v;
        }
        if let Some(v) = self.rows_per_buffer {
            cfg.rows_per_buffer = v;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedPipeline {
    pub steps: Vec<Step>,
    pub config: PipelineConfig,
}

impl ParsedPipeline {
    pub fn source(&self) -> Option<&Step> {
        self.steps.first()
    }

    pub fn num_repeats(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Repeat { .. }))
            .count()
    }
}

/// Parse a YAML document and check its shape: non-empty, exactly one source
/// and it comes first.
pub fn parse_yaml_pipeline(yaml_src: &str) -> Result<ParsedPipeline> {
    let doc: Pipeline = serde_yaml::from_str(yaml_src)?;

    let Some(first) = doc.steps.first() else {
        return Err(PlanError::Invalid("empty pipeline".into()));
    };
    if !first.is_source() {
        return Err(PlanError::Invalid(format!(
            "first step must be a source (range or values), got '{}'",
            first.kind()
        )));
    }
    if let Some(pos) = doc.steps.iter().skip(1).position(Step::is_source) {
        return Err(PlanError::Invalid(format!(
            "step {} is a second source; only linear pipelines are supported",
            pos + 1
        )));
    }

    Ok(ParsedPipeline {
        steps: doc.steps,
        config: doc.config.unwrap_or_default(),
    })
}
