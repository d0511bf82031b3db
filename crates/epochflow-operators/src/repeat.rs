//! Repeat operator: the epoch controller.
//!
//! `RepeatOp` is inlined. It has no thread and no connector; a pull on it runs
//! on the parent's thread and bounces to its single child with
//! `retry_if_eoe = true`. Every end-of-epoch coming up from the child is
//! counted:
//! - one pass left: the leaves found below this boundary are marked
//!   "last repeat" and will end their stream after the next pass;
//! - no pass left: the operator goes `Idle` and hands the final end-of-epoch
//!   to the parent;
//! - otherwise: the subtree is reset and the pull continues.
//!
//! Intermediate end-of-epoch markers are absorbed unless the operator was
//! built with `forward_epoch_markers(true)`, in which case each one is handed
//! to the parent once the subtree has been reset.
//!
//! An absorbed marker leaves the pulling worker's turn on the child connector
//! with that worker, so the next buffer lands in the marker's place. A marker
//! handed to the parent fills that place itself, so the turn is released.
//!
//! Nesting: a repeat below another repeat registers itself as a leaf of the
//! outer boundary. It only marks its own leaves once the outer boundary has
//! marked it, so leaves keep looping until the outermost pass ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use epochflow_core::buffer::DataBuffer;
use epochflow_core::id::OpId;
use epochflow_exec::{
    ControlFlags, DatasetOp, ExecError, OpBase, OpState, PrepareContext, PrepareFlags, Result,
};

/// Repeat count meaning "never stop".
pub const INFINITE_REPEAT: i32 = -1;

#[derive(Debug, Clone)]
pub struct RepeatOpBuilder {
    max_repeats: i32,
    forward_epoch_markers: bool,
}

impl RepeatOpBuilder {
    pub fn new(count: i32) -> Self {
        Self {
            max_repeats: count,
            forward_epoch_markers: false,
        }
    }

    /// Hand intermediate end-of-epoch markers to the parent instead of
    /// absorbing them.
    pub fn forward_epoch_markers(mut self, on: bool) -> Self {
        self.forward_epoch_markers = on;
        self
    }

    pub fn build(self) -> Result<RepeatOp> {
        self.sanity_check()?;
        Ok(RepeatOp {
            base: OpBase::new(),
            max_repeats: self.max_repeats,
            forward_epoch_markers: self.forward_epoch_markers,
            count: AtomicU64::new(0),
            leaf_ops: OnceLock::new(),
        })
    }

    fn sanity_check(&self) -> Result<()> {
        if self.max_repeats > 0 || self.max_repeats == INFINITE_REPEAT {
            Ok(())
        } else {
            Err(ExecError::Config {
                param: "count",
                constraint: format!("must be > 0 or {INFINITE_REPEAT}, got {}", self.max_repeats),
            })
        }
    }
}

pub struct RepeatOp {
    base: OpBase,
    max_repeats: i32,
    forward_epoch_markers: bool,
    count: AtomicU64,
    leaf_ops: OnceLock<Vec<Arc<dyn DatasetOp>>>,
}

impl RepeatOp {
    pub fn builder(count: i32) -> RepeatOpBuilder {
        RepeatOpBuilder::new(count)
    }

    pub fn max_repeats(&self) -> i32 {
        self.max_repeats
    }

    pub fn is_infinite(&self) -> bool {
        self.max_repeats == INFINITE_REPEAT
    }

    pub fn forwards_epoch_markers(&self) -> bool {
        self.forward_epoch_markers
    }

    /// End-of-epoch markers counted since the last reset.
    pub fn repeat_count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Ids of the leaves this boundary controls, in traversal order.
    pub fn leaf_ids(&self) -> Vec<OpId> {
        self.leaves().iter().map(|l| l.base().id()).collect()
    }

    fn leaves(&self) -> &[Arc<dyn DatasetOp>] {
        self.leaf_ops.get().map(Vec::as_slice).unwrap_or(&[])
    }

    fn label(&self) -> String {
        self.base.label(self.name())
    }

    fn child(&self) -> Result<Arc<dyn DatasetOp>> {
        self.base
            .child(0)?
            .ok_or_else(|| ExecError::MissingChild { op: self.label() })
    }

    /// True unless an outer boundary still has passes left for this one.
    fn in_last_outer_pass(&self) -> bool {
        let flags = self.base.control_flags();
        !flags.contains(ControlFlags::REPEATED) || flags.contains(ControlFlags::LAST_REPEAT)
    }

    fn flag_leaves(&self) -> Result<()> {
        for leaf in self.leaves() {
            leaf.mark_last_repeat()?;
        }
        tracing::info!(
            op = %self.label(),
            leaves = self.leaves().len(),
            "flagged leaves for their last repeat"
        );
        Ok(())
    }

    fn eoe_received(&self) -> Result<()> {
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(
            op = %self.label(),
            count,
            "repeat operator end of epoch received"
        );

        if !self.is_infinite() {
            let max = self.max_repeats as u64;
            if count + 1 == max && self.in_last_outer_pass() {
                self.flag_leaves()?;
            }
            if count == max {
                self.base.set_state(OpState::Idle);
                return Ok(());
            }
        }

        tracing::debug!(op = %self.label(), "resetting subtree");
        self.reset_subtree()
    }

    fn pull(&self, child: &dyn DatasetOp, worker_id: usize) -> Result<DataBuffer> {
        let mut buffer = child.get_next_buffer(worker_id, true)?;

        if self.base.state() == OpState::Idle {
            if buffer.is_eos() {
                self.eof_received();
            }
            return Ok(buffer);
        }

        while buffer.is_eoe() {
            self.eoe_received()?;
            if self.base.state() == OpState::Idle || self.forward_epoch_markers {
                return Ok(buffer);
            }
            buffer = child.get_next_buffer(worker_id, true)?;
        }
        if buffer.is_eos() {
            self.eof_received();
        }
        Ok(buffer)
    }

    fn eof_received(&self) {
        tracing::info!(op = %self.label(), "repeat operator end of stream received");
    }
}

impl DatasetOp for RepeatOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn name(&self) -> &'static str {
        "RepeatOp"
    }

    fn is_inlined(&self) -> bool {
        true
    }

    fn num_workers(&self) -> usize {
        0
    }

    fn get_next_buffer(&self, worker_id: usize, retry_if_eoe: bool) -> Result<DataBuffer> {
        let child = self.child()?;
        let buffer = self.pull(&*child, worker_id)?;
        // an end-of-epoch passed upward takes the caller's turn with it,
        // unless the caller asked to keep the turn itself
        if buffer.is_eoe() && !retry_if_eoe {
            child.release_turn(worker_id)?;
        }
        Ok(buffer)
    }

    fn prepare_node_action(&self, ctx: &mut PrepareContext) -> Result<()> {
        self.base.register(ctx)?;
        if self.base.num_children() == 0 {
            return Err(ExecError::MissingChild { op: self.label() });
        }

        let mut leaves = Vec::new();
        while let Some(leaf) = ctx.pop_leaf() {
            leaves.push(leaf);
        }
        leaves.reverse();

        if self.max_repeats == 1 && self.in_last_outer_pass() {
            for leaf in &leaves {
                leaf.mark_last_repeat()?;
            }
        }
        tracing::debug!(op = %self.label(), leaves = leaves.len(), "claimed leaves");
        self.leaf_ops
            .set(leaves)
            .map_err(|_| ExecError::Structural(format!("{} prepared twice", self.label())))?;

        if self.base.has_control_flag(ControlFlags::REPEATED) {
            ctx.push_leaf(self.base.this()?);
        }
        Ok(())
    }

    fn prepare_flags(&self) -> PrepareFlags {
        PrepareFlags::REPEAT
    }

    fn run(&self, _worker_id: usize) -> Result<()> {
        Err(ExecError::InlinedLaunch { op: self.label() })
    }

    fn mark_last_repeat(&self) -> Result<()> {
        self.base.set_control_flag(ControlFlags::LAST_REPEAT);
        if self.max_repeats == 1 {
            self.flag_leaves()?;
        }
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.count.store(0, Ordering::Release);
        self.base.set_state(OpState::Running);
        Ok(())
    }

    fn num_consumers(&self) -> Result<usize> {
        match self.base.parent()? {
            Some(parent) => parent.num_consumers(),
            None => {
                tracing::info!(
                    op = %self.label(),
                    "repeat operator has no parent, assuming it is the root"
                );
                Ok(1)
            }
        }
    }

    fn num_producers(&self) -> Result<usize> {
        self.child()?.num_producers()
    }

    fn print(&self, verbose: bool) -> String {
        let mut out = self.base.describe(self.name(), verbose);
        out.push_str(&format!(
            " max_repeats={} count={}",
            self.max_repeats,
            self.repeat_count()
        ));
        if verbose {
            let ids: Vec<String> = self
                .leaf_ids()
                .iter()
                .map(|id| id.get().to_string())
                .collect();
            out.push_str(&format!(" leaves=[{}]", ids.join(",")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_zero_and_negative_counts() {
        for bad in [0, -2, i32::MIN] {
            let err = RepeatOp::builder(bad).build().err().unwrap();
            assert!(err.is_config(), "{err}");
            assert!(err.to_string().contains("count"));
        }
        assert!(RepeatOp::builder(1).build().is_ok());
        assert!(RepeatOp::builder(INFINITE_REPEAT).build().unwrap().is_infinite());
    }

    #[test]
    fn launching_is_a_logic_error() {
        let op = RepeatOp::builder(2).build().unwrap();
        let err = op.run(0).unwrap_err();
        assert!(matches!(err, ExecError::InlinedLaunch { .. }));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("RepeatOp"));
    }

    #[test]
    fn fan_out_without_links() {
        let op = RepeatOp::builder(2).build().unwrap();
        assert_eq!(op.num_consumers().unwrap(), 1);
        assert!(matches!(
            op.num_producers(),
            Err(ExecError::MissingChild { .. })
        ));
        assert!(matches!(
            op.get_next_buffer(0, false),
            Err(ExecError::MissingChild { .. })
        ));
    }

    #[test]
    fn reset_clears_the_counter() {
        let op = RepeatOp::builder(3).build().unwrap();
        op.count.store(3, Ordering::Release);
        op.base.set_state(OpState::Idle);
        op.reset().unwrap();
        assert_eq!(op.repeat_count(), 0);
        assert_eq!(op.base.state(), OpState::Running);
    }
}
