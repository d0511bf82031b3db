//! Threaded operator applying a `Kernel` to every data buffer.
//!
//! Worker `w` pulls its child as consumer `w` and pushes to lane `w`. The
//! child connector hands buffers to consumers in strict turns and this
//! operator's connector reads lanes in the same rotation, so the output keeps
//! the input order. Markers are forwarded unchanged; a worker stops after
//! forwarding end-of-stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use epochflow_core::buffer::DataBuffer;
use epochflow_exec::{DatasetOp, ExecError, OpBase, PrepareContext, Result};

use crate::traits::Kernel;

pub struct MapOp {
    base: OpBase,
    kernel: Box<dyn Kernel>,
    num_workers: usize,
    processed: AtomicU64,
}

impl MapOp {
    pub fn new(kernel: impl Kernel, num_workers: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(ExecError::Config {
                param: "num_workers",
                constraint: "must be greater than 0".into(),
            });
        }
        Ok(Self {
            base: OpBase::new(),
            kernel: Box::new(kernel),
            num_workers,
            processed: AtomicU64::new(0),
        })
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    /// Data buffers transformed so far, across all workers.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    fn label(&self) -> String {
        self.base.label(self.name())
    }

    fn child(&self) -> Result<Arc<dyn DatasetOp>> {
        self.base
            .child(0)?
            .ok_or_else(|| ExecError::MissingChild { op: self.label() })
    }
}

impl DatasetOp for MapOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn name(&self) -> &'static str {
        "MapOp"
    }

    fn num_workers(&self) -> usize {
        self.num_workers
    }

    fn prepare_node_action(&self, ctx: &mut PrepareContext) -> Result<()> {
        self.child()?;
        self.base.register(ctx)
    }

    fn run(&self, worker_id: usize) -> Result<()> {
        let child = self.child()?;
        let out = self.base.out_connector()?;

        loop {
            let buffer = child.get_next_buffer(worker_id, false)?;
            if buffer.is_data() {
                let id = buffer.id();
                let rows = self
                    .kernel
                    .compute(buffer.into_rows())
                    .map_err(|e| e.into_kernel(self.label()))?;
                self.processed.fetch_add(1, Ordering::Relaxed);
                out.push(worker_id, DataBuffer::data(id, rows))?;
            } else if buffer.is_eoe() {
                out.push(worker_id, buffer)?;
            } else {
                out.push(worker_id, buffer)?;
                tracing::debug!(op = %self.label(), worker_id, "map worker reached end of stream");
                return Ok(());
            }
        }
    }

    fn print(&self, verbose: bool) -> String {
        format!(
            "{} kernel={} workers={}",
            self.base.describe(self.name(), verbose),
            self.kernel.name(),
            self.num_workers
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::RenameColumns;

    #[test]
    fn zero_workers_is_a_config_error() {
        let err = MapOp::new(RenameColumns::default(), 0).err().unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn map_needs_a_child() {
        let op = MapOp::new(RenameColumns::default(), 2).unwrap();
        assert_eq!(op.num_workers(), 2);
        assert_eq!(op.num_consumers().unwrap(), 2);
        let mut ctx = PrepareContext::new();
        assert!(matches!(
            op.prepare_node_action(&mut ctx),
            Err(ExecError::MissingChild { .. })
        ));
    }
}
