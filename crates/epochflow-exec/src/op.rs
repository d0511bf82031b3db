//! The operator capability interface.
//!
//! Every node in an execution tree implements `DatasetOp`. Two shapes exist:
//! - threaded operators own one connector and `num_workers` threads that the
//!   tree launches through `run`; their parents pull from that connector;
//! - inlined operators (`is_inlined() == true`) own no thread and no
//!   connector. A pull on them runs synchronously on the caller's thread and
//!   delegates to their child; `run` on them is a tree-construction bug.
//!
//! Structural state shared by all operators (ids, links, control flags,
//! lifecycle, output connector) lives in `OpBase`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use epochflow_core::buffer::DataBuffer;
use epochflow_core::id::OpId;

use crate::connector::Connector;
use crate::error::{ExecError, Result};
use crate::flags::{ControlFlags, OpState, PrepareFlags};
use crate::prepare::PrepareContext;

pub trait DatasetOp: Send + Sync + 'static {
    fn base(&self) -> &OpBase;

    /// Human-readable operator name (stable).
    fn name(&self) -> &'static str;

    fn is_inlined(&self) -> bool {
        false
    }

    /// Threads the tree launches for this operator; also its output lane count.
    fn num_workers(&self) -> usize {
        1
    }

    /// Pull the next buffer on behalf of consumer thread `worker_id`.
    fn get_next_buffer(&self, worker_id: usize, retry_if_eoe: bool) -> Result<DataBuffer> {
        self.base()
            .out_connector()?
            .pop_with_retry(worker_id, retry_if_eoe)
    }

    /// Hand on a turn that `worker_id` kept by pulling an end-of-epoch with
    /// `retry_if_eoe`. Inlined operators forward to the connector below them.
    fn release_turn(&self, worker_id: usize) -> Result<()> {
        if self.is_inlined() {
            return match self.base().child(0)? {
                Some(child) => child.release_turn(worker_id),
                None => Ok(()),
            };
        }
        self.base().out_connector()?.release_turn(worker_id)
    }

    /// Bottom-up hook of the preparation pass. The default registers leaves
    /// that sit below a repeat boundary.
    fn prepare_node_action(&self, ctx: &mut PrepareContext) -> Result<()> {
        self.base().register(ctx)
    }

    /// Flags this operator imposes on its subtree during preparation.
    fn prepare_flags(&self) -> PrepareFlags {
        PrepareFlags::NONE
    }

    /// Execution loop of one worker thread.
    fn run(&self, worker_id: usize) -> Result<()>;

    /// Called by the enclosing repeat boundary when one pass remains.
    fn mark_last_repeat(&self) -> Result<()> {
        self.base().set_control_flag(ControlFlags::LAST_REPEAT);
        Ok(())
    }

    /// Restart this operator for another pass.
    fn reset(&self) -> Result<()> {
        self.base().set_state(OpState::Running);
        Ok(())
    }

    /// Reset every descendant, each node before its own children, so that a
    /// nested boundary is active again before its leaves restart. The caller
    /// itself is not reset.
    fn reset_subtree(&self) -> Result<()> {
        for child in self.base().children()? {
            child.reset()?;
            child.reset_subtree()?;
        }
        Ok(())
    }

    /// Threads that pull from this operator's child.
    fn num_consumers(&self) -> Result<usize> {
        Ok(self.num_workers())
    }

    /// Lanes of this operator's output.
    fn num_producers(&self) -> Result<usize> {
        Ok(self.num_workers())
    }

    /// Diagnostic dump.
    fn print(&self, verbose: bool) -> String {
        self.base().describe(self.name(), verbose)
    }
}

pub struct OpBase {
    id: OnceLock<OpId>,
    this: OnceLock<Weak<dyn DatasetOp>>,
    children: RwLock<Vec<Arc<dyn DatasetOp>>>,
    parents: RwLock<Vec<Weak<dyn DatasetOp>>>,
    control_flags: AtomicU32,
    state: AtomicU8,
    out_connector: OnceLock<Arc<Connector>>,
}

impl OpBase {
    pub fn new() -> Self {
        Self {
            id: OnceLock::new(),
            this: OnceLock::new(),
            children: RwLock::new(Vec::new()),
            parents: RwLock::new(Vec::new()),
            control_flags: AtomicU32::new(0),
            state: AtomicU8::new(OpState::Running.to_u8()),
            out_connector: OnceLock::new(),
        }
    }

    pub fn id(&self) -> OpId {
        self.id.get().copied().unwrap_or(OpId::UNASSIGNED)
    }

    /// `name(id)`, used in logs and error messages.
    pub fn label(&self, name: &str) -> String {
        match self.id.get() {
            Some(id) => format!("{name}({})", id.get()),
            None => format!("{name}(unassigned)"),
        }
    }

    pub fn children(&self) -> Result<Vec<Arc<dyn DatasetOp>>> {
        let children = self
            .children
            .read()
            .map_err(|_| ExecError::poisoned("operator children"))?;
        Ok(children.clone())
    }

    pub fn child(&self, idx: usize) -> Result<Option<Arc<dyn DatasetOp>>> {
        let children = self
            .children
            .read()
            .map_err(|_| ExecError::poisoned("operator children"))?;
        Ok(children.get(idx).cloned())
    }

    pub fn num_children(&self) -> usize {
        self.children.read().map(|c| c.len()).unwrap_or(0)
    }

    /// First parent, if it is still alive.
    pub fn parent(&self) -> Result<Option<Arc<dyn DatasetOp>>> {
        let parents = self
            .parents
            .read()
            .map_err(|_| ExecError::poisoned("operator parents"))?;
        Ok(parents.first().and_then(Weak::upgrade))
    }

    pub fn has_parent(&self) -> bool {
        self.parents.read().map(|p| !p.is_empty()).unwrap_or(false)
    }

    pub fn control_flags(&self) -> ControlFlags {
        ControlFlags::from_bits(self.control_flags.load(Ordering::Acquire))
    }

    pub fn has_control_flag(&self, flag: ControlFlags) -> bool {
        self.control_flags().contains(flag)
    }

    pub fn set_control_flag(&self, flag: ControlFlags) {
        self.control_flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    pub fn state(&self) -> OpState {
        OpState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: OpState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub fn out_connector(&self) -> Result<&Arc<Connector>> {
        self.out_connector.get().ok_or_else(|| {
            ExecError::Structural(format!(
                "operator {} has no output connector; the tree was not launched",
                self.id()
            ))
        })
    }

    /// Shared handle to the operator owning this base.
    pub fn this(&self) -> Result<Arc<dyn DatasetOp>> {
        self.this.get().and_then(Weak::upgrade).ok_or_else(|| {
            ExecError::Structural(format!(
                "operator {} is not associated with a tree",
                self.id()
            ))
        })
    }

    /// Default preparation action: below a repeat boundary, mark the operator
    /// as repeated and, if it is a leaf, register it for the boundary.
    pub fn register(&self, ctx: &mut PrepareContext) -> Result<()> {
        if ctx.inherited_flags().contains(PrepareFlags::REPEAT) {
            self.set_control_flag(ControlFlags::REPEATED);
            if self.num_children() == 0 {
                ctx.push_leaf(self.this()?);
            }
        }
        Ok(())
    }

    pub fn describe(&self, name: &str, verbose: bool) -> String {
        let mut out = format!(
            "{} state={} flags={:#b} children={}",
            self.label(name),
            self.state(),
            self.control_flags().bits(),
            self.num_children()
        );
        if verbose {
            if let Ok(children) = self.children() {
                let ids: Vec<String> = children
                    .iter()
                    .map(|c| c.base().id().get().to_string())
                    .collect();
                let _ = write!(out, " child_ids=[{}]", ids.join(","));
            }
            match self.out_connector.get() {
                Some(conn) => {
                    let _ = write!(
                        out,
                        " connector(producers={}, consumers={}, capacity={}, epochs_observed={})",
                        conn.num_producers(),
                        conn.num_consumers(),
                        conn.capacity(),
                        conn.epochs_observed()
                    );
                }
                None => out.push_str(" connector=none"),
            }
        }
        out
    }

    pub(crate) fn bind(&self, id: OpId, this: Weak<dyn DatasetOp>) -> Result<()> {
        self.id
            .set(id)
            .map_err(|_| ExecError::Structural(format!("operator {id} associated twice")))?;
        self.this
            .set(this)
            .map_err(|_| ExecError::Structural(format!("operator {id} associated twice")))
    }

    pub(crate) fn add_child(&self, child: Arc<dyn DatasetOp>) -> Result<()> {
        self.children
            .write()
            .map_err(|_| ExecError::poisoned("operator children"))?
            .push(child);
        Ok(())
    }

    pub(crate) fn add_parent(&self, parent: Weak<dyn DatasetOp>) -> Result<()> {
        self.parents
            .write()
            .map_err(|_| ExecError::poisoned("operator parents"))?
            .push(parent);
        Ok(())
    }

    pub(crate) fn set_out_connector(&self, connector: Arc<Connector>) -> Result<()> {
        self.out_connector.set(connector).map_err(|_| {
            ExecError::Structural(format!("operator {} launched twice", self.id()))
        })
    }
}

impl Default for OpBase {
    fn default() -> Self {
        Self::new()
    }
}
