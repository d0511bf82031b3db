//! Lowering: `ParsedPipeline` -> `ExecutionTree`.
//!
//! Steps become operators in order; each operator is the parent of the one
//! built before it, and the last step is the root. The tree is returned
//! unprepared so callers can still inspect or print it.

use std::sync::Arc;

use epochflow_core::config::EngineConfig;
use epochflow_core::types::{Column, RowBatch, Scalar};
use epochflow_exec::{DatasetOp, ExecutionTree};
use epochflow_operators::{
    FilterRows, MapOp, MemorySource, OpError, RangeSource, RenameColumns, RepeatOp, SourceOp,
};

use crate::dsl::yaml::{ParsedPipeline, Step};
use crate::error::{PlanError, Result};

/// Layer the pipeline's `config:` block over `base` and validate the result.
pub fn resolve_config(parsed: &ParsedPipeline, base: EngineConfig) -> Result<EngineConfig> {
    let mut cfg = base;
    parsed.config.apply_to(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

pub fn build_tree(parsed: &ParsedPipeline, config: EngineConfig) -> Result<ExecutionTree> {
    let mut tree = ExecutionTree::new(config.clone())?;
    let mut prev: Option<Arc<dyn DatasetOp>> = None;

    for (idx, step) in parsed.steps.iter().enumerate() {
        let op = lower_step(idx, step, &config)?;
        tree.associate(Arc::clone(&op))?;
        if let Some(child) = &prev {
            tree.add_child(&*op, &**child)?;
        }
        prev = Some(op);
    }

    let root = prev.ok_or_else(|| PlanError::Invalid("empty pipeline".into()))?;
    tree.assign_root(&*root)?;
    Ok(tree)
}

fn lower_step(idx: usize, step: &Step, config: &EngineConfig) -> Result<Arc<dyn DatasetOp>> {
    let kernel_err = |source: OpError| PlanError::Kernel { step: idx, source };

    let op: Arc<dyn DatasetOp> = match step {
        Step::Range {
            rows,
            rows_per_buffer,
        } => {
            let per_buffer = rows_per_buffer.unwrap_or(config.rows_per_buffer);
            let source = RangeSource::new(*rows, per_buffer).map_err(kernel_err)?;
            Arc::new(SourceOp::new(source))
        }
        Step::Values {
            column,
            values,
            rows_per_buffer,
        } => {
            let per_buffer = rows_per_buffer.unwrap_or(config.rows_per_buffer);
            if per_buffer == 0 {
                return Err(PlanError::Invalid(format!(
                    "step {idx}: rows_per_buffer must be greater than 0"
                )));
            }
            let batches = values
                .chunks(per_buffer)
                .map(|chunk| {
                    let cells = chunk.iter().copied().map(Scalar::I64).collect();
                    RowBatch::new(vec![Column::new(column.clone(), cells)])
                })
                .collect();
            Arc::new(SourceOp::new(MemorySource::new(batches)))
        }
        Step::Rename { expr, workers } => {
            let kernel = RenameColumns::parse(expr).map_err(kernel_err)?;
            Arc::new(MapOp::new(
                kernel,
                workers.unwrap_or(config.num_parallel_workers),
            )?)
        }
        Step::Filter { expr, workers } => {
            let kernel = FilterRows::parse(expr).map_err(kernel_err)?;
            Arc::new(MapOp::new(
                kernel,
                workers.unwrap_or(config.num_parallel_workers),
            )?)
        }
        Step::Repeat {
            count,
            forward_epoch_markers,
        } => Arc::new(
            RepeatOp::builder(*count)
                .forward_epoch_markers(*forward_epoch_markers)
                .build()?,
        ),
    };
    Ok(op)
}
