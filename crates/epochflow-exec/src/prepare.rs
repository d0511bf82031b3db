//! Traversal context for the tree preparation pass.
//!
//! The tree walks operators depth-first. Entering an operator pushes a frame
//! that ORs the operator's `PrepareFlags` into the flags seen by its subtree
//! and remembers how deep the leaf stack was. Leaves below a repeat boundary
//! push themselves; a control operator's `prepare_node_action` runs before its
//! frame is popped and drains only the leaves pushed inside its own subtree.
//! A nested control operator has already drained its leaves by then, so each
//! leaf is owned by the nearest enclosing boundary.

use std::sync::Arc;

use crate::flags::PrepareFlags;
use crate::op::DatasetOp;

struct Frame {
    inherited: PrepareFlags,
    leaf_mark: usize,
}

#[derive(Default)]
pub struct PrepareContext {
    flags: PrepareFlags,
    leaf_stack: Vec<Arc<dyn DatasetOp>>,
    frames: Vec<Frame>,
}

impl PrepareContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags declared by the operator's ancestors only.
    pub fn inherited_flags(&self) -> PrepareFlags {
        self.frames
            .last()
            .map(|f| f.inherited)
            .unwrap_or(PrepareFlags::NONE)
    }

    pub fn push_leaf(&mut self, op: Arc<dyn DatasetOp>) {
        self.leaf_stack.push(op);
    }

    /// Pop a leaf registered inside the current operator's subtree.
    pub fn pop_leaf(&mut self) -> Option<Arc<dyn DatasetOp>> {
        let mark = self.frames.last().map(|f| f.leaf_mark).unwrap_or(0);
        if self.leaf_stack.len() > mark {
            self.leaf_stack.pop()
        } else {
            None
        }
    }

    /// Leaves pushed and not yet claimed by a control operator.
    pub fn pending_leaves(&self) -> usize {
        self.leaf_stack.len()
    }

    pub(crate) fn enter(&mut self, own: PrepareFlags) {
        self.frames.push(Frame {
            inherited: self.flags,
            leaf_mark: self.leaf_stack.len(),
        });
        self.flags = self.flags | own;
    }

    pub(crate) fn exit(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.flags = frame.inherited;
        }
    }
}
