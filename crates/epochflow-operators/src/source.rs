//! Leaf operator iterating a `DataSource`.
//!
//! One worker thread. Each pass pushes the source's batches, then an
//! end-of-epoch. Flags are read before the marker goes out: a source that is
//! not below a repeat boundary, or has been marked for its last repeat, follows
//! the marker with end-of-stream and stops. Otherwise it blocks until its
//! boundary resets it and rewinds the source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crossbeam_channel::{select, unbounded, Receiver, Sender};

use epochflow_core::buffer::DataBuffer;
use epochflow_core::id::BufferId;
use epochflow_core::types::{Column, RowBatch, Scalar};
use epochflow_exec::{ControlFlags, DatasetOp, ExecError, OpBase, OpState, Result};

use crate::traits::{DataSource, OpError};

/// Fixed batches held in memory.
pub struct MemorySource {
    batches: Vec<RowBatch>,
    pos: usize,
}

impl MemorySource {
    pub fn new(batches: Vec<RowBatch>) -> Self {
        Self { batches, pos: 0 }
    }
}

impl DataSource for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn next_batch(&mut self) -> std::result::Result<Option<RowBatch>, OpError> {
        let batch = self.batches.get(self.pos).cloned();
        if batch.is_some() {
            self.pos += 1;
        }
        Ok(batch)
    }

    fn rewind(&mut self) -> std::result::Result<(), OpError> {
        self.pos = 0;
        Ok(())
    }
}

/// Generated rows `0..total_rows` with columns `id` (I64) and `label` (Str).
pub struct RangeSource {
    total_rows: u64,
    rows_per_buffer: u64,
    next_row: u64,
}

impl RangeSource {
    pub fn new(total_rows: u64, rows_per_buffer: usize) -> std::result::Result<Self, OpError> {
        if rows_per_buffer == 0 {
            return Err(OpError::Source("rows_per_buffer must be greater than 0".into()));
        }
        Ok(Self {
            total_rows,
            rows_per_buffer: rows_per_buffer as u64,
            next_row: 0,
        })
    }
}

impl DataSource for RangeSource {
    fn name(&self) -> &'static str {
        "range"
    }

    fn next_batch(&mut self) -> std::result::Result<Option<RowBatch>, OpError> {
        if self.next_row >= self.total_rows {
            return Ok(None);
        }
        let end = (self.next_row + self.rows_per_buffer).min(self.total_rows);
        let rows = self.next_row..end;
        self.next_row = end;

        let ids = rows.clone().map(|i| Scalar::I64(i as i64)).collect();
        let labels = rows.map(|i| Scalar::Str(format!("row-{i}"))).collect();
        Ok(Some(RowBatch::new(vec![
            Column::new("id", ids),
            Column::new("label", labels),
        ])))
    }

    fn rewind(&mut self) -> std::result::Result<(), OpError> {
        self.next_row = 0;
        Ok(())
    }
}

pub struct SourceOp {
    base: OpBase,
    source: Mutex<Box<dyn DataSource>>,
    reset_tx: Sender<()>,
    reset_rx: Receiver<()>,
    epochs: AtomicU64,
}

impl SourceOp {
    pub fn new(source: impl DataSource) -> Self {
        let (reset_tx, reset_rx) = unbounded();
        Self {
            base: OpBase::new(),
            source: Mutex::new(Box::new(source)),
            reset_tx,
            reset_rx,
            epochs: AtomicU64::new(0),
        }
    }

    /// Passes pushed so far, each closed by an end-of-epoch.
    pub fn epochs_completed(&self) -> u64 {
        self.epochs.load(Ordering::Acquire)
    }

    fn label(&self) -> String {
        self.base.label(self.name())
    }

    fn lock_source(&self) -> Result<MutexGuard<'_, Box<dyn DataSource>>> {
        self.source
            .lock()
            .map_err(|_| ExecError::UnexpectedState(format!("{} source lock poisoned", self.label())))
    }

    fn is_final_pass(&self) -> bool {
        let flags = self.base.control_flags();
        !flags.contains(ControlFlags::REPEATED) || flags.contains(ControlFlags::LAST_REPEAT)
    }
}

impl DatasetOp for SourceOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn name(&self) -> &'static str {
        "SourceOp"
    }

    fn run(&self, worker_id: usize) -> Result<()> {
        let out = self.base.out_connector()?;
        let mut next_id = 0u64;
        let mut buffer_id = || {
            let id = BufferId::new(next_id);
            next_id += 1;
            id
        };

        loop {
            loop {
                let batch = self
                    .lock_source()?
                    .next_batch()
                    .map_err(|e| e.into_source(self.label()))?;
                let Some(rows) = batch else { break };
                out.push(worker_id, DataBuffer::data(buffer_id(), rows))?;
            }

            let epoch = self.epochs.fetch_add(1, Ordering::AcqRel) + 1;
            let last = self.is_final_pass();
            out.push(worker_id, DataBuffer::end_of_epoch(buffer_id()))?;

            if last {
                out.push(worker_id, DataBuffer::end_of_stream(buffer_id()))?;
                self.base.set_state(OpState::Terminated);
                tracing::debug!(op = %self.label(), epochs = epoch, "source finished");
                return Ok(());
            }

            tracing::trace!(op = %self.label(), epoch, "source waiting for reset");
            select! {
                recv(self.reset_rx) -> msg => msg.map_err(|_| {
                    ExecError::UnexpectedState(format!("{} reset channel closed", self.label()))
                })?,
                recv(out.shutdown_signal().listener()) -> _ => return Err(ExecError::Interrupted),
            }
            self.lock_source()?
                .rewind()
                .map_err(|e| e.into_source(self.label()))?;
        }
    }

    fn reset(&self) -> Result<()> {
        self.base.set_state(OpState::Running);
        self.reset_tx
            .send(())
            .map_err(|_| ExecError::UnexpectedState(format!("{} reset channel closed", self.label())))
    }

    fn print(&self, verbose: bool) -> String {
        let mut out = self.base.describe(self.name(), verbose);
        if let Ok(source) = self.source.lock() {
            out.push_str(&format!(" source={}", source.name()));
        }
        out.push_str(&format!(" epochs={}", self.epochs_completed()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_source_batches_and_rewinds() {
        let mut src = RangeSource::new(5, 2).unwrap();
        let sizes: Vec<usize> = std::iter::from_fn(|| src.next_batch().unwrap())
            .map(|b| b.num_rows())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        src.rewind().unwrap();
        let first = src.next_batch().unwrap().unwrap();
        assert_eq!(first.column("id").unwrap().values[0], Scalar::I64(0));
        assert_eq!(
            first.column("label").unwrap().values[1],
            Scalar::Str("row-1".into())
        );
    }

    #[test]
    fn range_source_rejects_empty_buffers() {
        assert!(RangeSource::new(5, 0).is_err());
    }

    #[test]
    fn memory_source_replays_after_rewind() {
        let mut src = MemorySource::new(vec![RowBatch::from_i64_range("id", 0..3)]);
        assert!(src.next_batch().unwrap().is_some());
        assert!(src.next_batch().unwrap().is_none());
        src.rewind().unwrap();
        assert_eq!(src.next_batch().unwrap().unwrap().num_rows(), 3);
    }

    #[test]
    fn unlaunched_source_cannot_run() {
        let op = SourceOp::new(MemorySource::new(Vec::new()));
        assert!(matches!(op.run(0), Err(ExecError::Structural(_))));
    }
}
