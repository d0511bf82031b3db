//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use epochflow_core::buffer::{BufferFlag, DataBuffer};
use epochflow_core::config::EngineConfig;
use epochflow_core::id::BufferId;
use epochflow_core::types::RowBatch;
use epochflow_exec::{
    ControlFlags, DatasetOp, ExecError, ExecutionTree, OpBase, Result,
};
use epochflow_operators::{DataSource, OpError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Emitting,
    AwaitingReset,
    PendingEos,
    Done,
}

struct LeafState {
    phase: Phase,
    emitted_in_epoch: usize,
    next_id: u64,
    total_emitted: u64,
}

/// Inlined leaf that answers pulls on the caller's thread.
///
/// Each epoch is `data_per_epoch` data buffers then an end-of-epoch. After the
/// marker it either ends the stream (not repeated, or marked last) or refuses
/// to start another epoch until it is reset.
pub struct ScriptedLeaf {
    base: OpBase,
    data_per_epoch: usize,
    fail_after: Option<u64>,
    state: Mutex<LeafState>,
    epochs_started: AtomicU64,
    epochs_completed: AtomicU64,
    resets: AtomicU64,
    marks: AtomicU64,
    marked_after_epochs: Mutex<Option<u64>>,
}

impl ScriptedLeaf {
    pub fn new(data_per_epoch: usize) -> Arc<Self> {
        Arc::new(Self::build(data_per_epoch, None))
    }

    /// Fails with a source error once `n` data buffers have been emitted.
    pub fn failing_after(data_per_epoch: usize, n: u64) -> Arc<Self> {
        Arc::new(Self::build(data_per_epoch, Some(n)))
    }

    fn build(data_per_epoch: usize, fail_after: Option<u64>) -> Self {
        Self {
            base: OpBase::new(),
            data_per_epoch,
            fail_after,
            state: Mutex::new(LeafState {
                phase: Phase::Emitting,
                emitted_in_epoch: 0,
                next_id: 0,
                total_emitted: 0,
            }),
            epochs_started: AtomicU64::new(0),
            epochs_completed: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            marks: AtomicU64::new(0),
            marked_after_epochs: Mutex::new(None),
        }
    }

    pub fn epochs_started(&self) -> u64 {
        self.epochs_started.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    /// How many times the leaf was marked for its last repeat.
    pub fn marks(&self) -> u64 {
        self.marks.load(Ordering::SeqCst)
    }

    /// Completed epochs at the moment of the first mark.
    pub fn marked_after_epochs(&self) -> Option<u64> {
        *self.marked_after_epochs.lock().unwrap()
    }
}

impl DatasetOp for ScriptedLeaf {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn name(&self) -> &'static str {
        "ScriptedLeaf"
    }

    fn is_inlined(&self) -> bool {
        true
    }

    fn num_workers(&self) -> usize {
        0
    }

    fn get_next_buffer(&self, _worker_id: usize, _retry_if_eoe: bool) -> Result<DataBuffer> {
        let mut st = self.state.lock().unwrap();
        let id = BufferId::new(st.next_id);
        st.next_id += 1;

        match st.phase {
            Phase::Done => Ok(DataBuffer::end_of_stream(id)),
            Phase::PendingEos => {
                st.phase = Phase::Done;
                Ok(DataBuffer::end_of_stream(id))
            }
            Phase::AwaitingReset => Err(ExecError::UnexpectedState(
                "new epoch requested without a reset".into(),
            )),
            Phase::Emitting => {
                if st.emitted_in_epoch == 0 {
                    self.epochs_started.fetch_add(1, Ordering::SeqCst);
                }
                if Some(st.total_emitted) == self.fail_after {
                    return Err(ExecError::Source {
                        op: self.base.label(self.name()),
                        message: "scripted failure".into(),
                    });
                }
                if st.emitted_in_epoch < self.data_per_epoch {
                    st.emitted_in_epoch += 1;
                    st.total_emitted += 1;
                    let v = st.total_emitted as i64;
                    return Ok(DataBuffer::data(id, RowBatch::from_i64_range("id", v..v + 1)));
                }

                let flags = self.base.control_flags();
                let last = !flags.contains(ControlFlags::REPEATED)
                    || flags.contains(ControlFlags::LAST_REPEAT);
                st.phase = if last {
                    Phase::PendingEos
                } else {
                    Phase::AwaitingReset
                };
                self.epochs_completed.fetch_add(1, Ordering::SeqCst);
                Ok(DataBuffer::end_of_epoch(id))
            }
        }
    }

    fn run(&self, _worker_id: usize) -> Result<()> {
        Err(ExecError::InlinedLaunch {
            op: self.base.label(self.name()),
        })
    }

    fn mark_last_repeat(&self) -> Result<()> {
        if self.marks.fetch_add(1, Ordering::SeqCst) == 0 {
            *self.marked_after_epochs.lock().unwrap() =
                Some(self.epochs_completed.load(Ordering::SeqCst));
        }
        self.base.set_control_flag(ControlFlags::LAST_REPEAT);
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.phase == Phase::AwaitingReset {
            st.phase = Phase::Emitting;
            st.emitted_in_epoch = 0;
        }
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `DataSource` that fails on the given batch.
pub struct FlakySource {
    pub fail_on: usize,
    pub served: usize,
}

impl DataSource for FlakySource {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn next_batch(&mut self) -> std::result::Result<Option<RowBatch>, OpError> {
        if self.served == self.fail_on {
            return Err(OpError::Source("device unplugged".into()));
        }
        self.served += 1;
        Ok(Some(RowBatch::from_i64_range("id", 0..1)))
    }

    fn rewind(&mut self) -> std::result::Result<(), OpError> {
        self.served = 0;
        Ok(())
    }
}

/// Small connectors so backpressure is exercised.
pub fn small_config() -> EngineConfig {
    EngineConfig {
        connector_queue_size: 2,
        num_parallel_workers: 2,
        rows_per_buffer: 3,
        seed: Some(7),
    }
}

/// Type-erase a concrete operator handle.
pub fn erase<T: DatasetOp>(op: &Arc<T>) -> Arc<dyn DatasetOp> {
    Arc::clone(op) as Arc<dyn DatasetOp>
}

/// Build a linear chain: `ops[0]` is the leaf, the last op is the root.
pub fn chain(config: EngineConfig, ops: &[Arc<dyn DatasetOp>]) -> ExecutionTree {
    let mut tree = ExecutionTree::new(config).unwrap();
    for op in ops {
        tree.associate(Arc::clone(op)).unwrap();
    }
    for pair in ops.windows(2) {
        tree.add_child(&*pair[1], &*pair[0]).unwrap();
    }
    tree.assign_root(&**ops.last().unwrap()).unwrap();
    tree
}

/// Pull from the root until end-of-stream, recording every flag.
pub fn drain_flags(tree: &mut ExecutionTree) -> Vec<BufferFlag> {
    let mut flags = Vec::new();
    loop {
        let buffer = tree.get_next_buffer().unwrap();
        flags.push(buffer.flag());
        if buffer.is_eos() {
            return flags;
        }
    }
}

/// Pull from the root until end-of-stream, collecting the `column` values of
/// every data buffer, with `None` standing for an end-of-epoch.
pub fn drain_i64(tree: &mut ExecutionTree, column: &str) -> Vec<Option<i64>> {
    use epochflow_core::types::Scalar;
    let mut out = Vec::new();
    loop {
        let buffer = tree.get_next_buffer().unwrap();
        if buffer.is_eos() {
            return out;
        }
        if buffer.is_eoe() {
            out.push(None);
            continue;
        }
        let col = buffer.rows().column(column).unwrap();
        for v in &col.values {
            match v {
                Scalar::I64(i) => out.push(Some(*i)),
                other => panic!("unexpected value {other:?}"),
            }
        }
    }
}

pub fn flags_of(pattern: &str) -> Vec<BufferFlag> {
    pattern.chars()
        .map(|c| match c {
            'D' => BufferFlag::Data,
            'E' => BufferFlag::EndOfEpoch,
            'S' => BufferFlag::EndOfStream,
            other => panic!("bad flag {other}"),
        })
        .collect()
}
