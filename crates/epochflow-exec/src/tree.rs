//! Execution tree: owns the operator graph and drives it.
//!
//! Lifecycle:
//! 1. `associate` every operator, link them with `add_child`, `assign_root`;
//! 2. `prepare` once: a depth-first pass that propagates prepare flags
//!    top-down and calls each operator's `prepare_node_action` bottom-up;
//! 3. `launch`: build one connector per threaded operator and spawn its
//!    workers;
//! 4. pull from the root with `get_next_buffer` (or `run_to_end`);
//! 5. `join`.
//!
//! A worker failure is recorded, triggers the tree's `ShutdownSignal`, and is
//! the error every later root pull and `join` reports.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use epochflow_core::buffer::DataBuffer;
use epochflow_core::config::EngineConfig;
use epochflow_core::hash::StreamDigest;
use epochflow_core::id::OpId;
use epochflow_core::manifest::RunManifest;

use crate::connector::Connector;
use crate::error::{ExecError, Result};
use crate::metrics::{emit_span, now_ms};
use crate::op::DatasetOp;
use crate::prepare::PrepareContext;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    Init,
    Ready,
    Executing,
    Finished,
}

impl fmt::Display for TreeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TreeState::Init => "init",
            TreeState::Ready => "ready",
            TreeState::Executing => "executing",
            TreeState::Finished => "finished",
        };
        f.write_str(s)
    }
}

type FailureSlot = Arc<Mutex<Option<ExecError>>>;

struct Worker {
    label: String,
    handle: JoinHandle<()>,
}

pub struct ExecutionTree {
    config: EngineConfig,
    ops: Vec<Arc<dyn DatasetOp>>,
    root: Option<Arc<dyn DatasetOp>>,
    state: TreeState,
    shutdown: ShutdownSignal,
    workers: Vec<Worker>,
    failure: FailureSlot,
    next_id: u64,
}

impl ExecutionTree {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ops: Vec::new(),
            root: None,
            state: TreeState::Init,
            shutdown: ShutdownSignal::new(),
            workers: Vec::new(),
            failure: Arc::new(Mutex::new(None)),
            next_id: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> TreeState {
        self.state
    }

    pub fn root(&self) -> Option<&Arc<dyn DatasetOp>> {
        self.root.as_ref()
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Register an operator with this tree and give it an id.
    pub fn associate(&mut self, op: Arc<dyn DatasetOp>) -> Result<OpId> {
        self.expect_state(TreeState::Init, "associate")?;
        let id = OpId::new(self.next_id);
        op.base().bind(id, Arc::downgrade(&op))?;
        self.next_id += 1;
        self.ops.push(op);
        Ok(id)
    }

    pub fn add_child(&mut self, parent: &dyn DatasetOp, child: &dyn DatasetOp) -> Result<()> {
        self.expect_state(TreeState::Init, "add_child")?;
        let parent = self.owned(parent)?;
        let child = self.owned(child)?;

        if child.base().has_parent() {
            return Err(ExecError::Structural(format!(
                "{} already has a parent",
                child.base().label(child.name())
            )));
        }
        // walking up from the parent must not reach the child
        let mut cursor = Some(Arc::clone(&parent));
        while let Some(node) = cursor {
            if Arc::ptr_eq(&node, &child) {
                return Err(ExecError::Structural(format!(
                    "adding {} under {} would create a cycle",
                    child.base().label(child.name()),
                    parent.base().label(parent.name())
                )));
            }
            cursor = node.base().parent()?;
        }

        parent.base().add_child(Arc::clone(&child))?;
        child.base().add_parent(Arc::downgrade(&parent))?;
        Ok(())
    }

    pub fn assign_root(&mut self, op: &dyn DatasetOp) -> Result<()> {
        self.expect_state(TreeState::Init, "assign_root")?;
        let op = self.owned(op)?;
        if op.base().has_parent() {
            return Err(ExecError::Structural(format!(
                "{} has a parent and cannot be the root",
                op.base().label(op.name())
            )));
        }
        self.root = Some(op);
        Ok(())
    }

    /// Run the preparation pass. Only valid once.
    pub fn prepare(&mut self) -> Result<()> {
        self.expect_state(TreeState::Init, "prepare")?;
        let root = self.require_root()?;

        let mut ctx = PrepareContext::new();
        let visited = prepare_node(&root, &mut ctx)?;
        if visited != self.ops.len() {
            return Err(ExecError::Structural(format!(
                "{} associated operators are not reachable from the root",
                self.ops.len() - visited
            )));
        }
        if ctx.pending_leaves() > 0 {
            tracing::warn!(
                pending = ctx.pending_leaves(),
                "leaves registered below a repeat boundary were not claimed"
            );
        }

        self.state = TreeState::Ready;
        tracing::info!(ops = self.ops.len(), "execution tree prepared");
        Ok(())
    }

    /// Create connectors and spawn the worker threads of every threaded
    /// operator.
    pub fn launch(&mut self) -> Result<()> {
        self.expect_state(TreeState::Ready, "launch")?;

        for op in &self.ops {
            if op.is_inlined() {
                continue;
            }
            let consumers = match op.base().parent()? {
                Some(parent) => parent.num_consumers()?,
                None => 1,
            };
            let connector = Connector::new(
                op.num_producers()?,
                consumers,
                self.config.connector_queue_size,
                self.shutdown.clone(),
            )?;
            op.base().set_out_connector(Arc::new(connector))?;
        }

        let ops = self.ops.clone();
        for op in ops {
            if op.is_inlined() {
                continue;
            }
            for worker_id in 0..op.num_workers() {
                self.spawn_worker(Arc::clone(&op), worker_id)?;
            }
        }

        self.state = TreeState::Executing;
        tracing::info!(workers = self.workers.len(), "execution tree launched");
        Ok(())
    }

    /// Pull the next buffer from the root on the calling thread.
    pub fn get_next_buffer(&mut self) -> Result<DataBuffer> {
        if !matches!(self.state, TreeState::Executing | TreeState::Finished) {
            return Err(ExecError::Structural(format!(
                "get_next_buffer on a tree in state {}",
                self.state
            )));
        }
        let root = self.require_root()?;
        match root.get_next_buffer(0, false) {
            Ok(buffer) => {
                if buffer.is_eos() {
                    self.state = TreeState::Finished;
                }
                Ok(buffer)
            }
            Err(err) => {
                self.shutdown.shutdown();
                Err(self.take_failure().unwrap_or(err))
            }
        }
    }

    /// Prepare and launch if needed, drain the root to end-of-stream, join.
    pub fn run_to_end(&mut self) -> Result<RunManifest> {
        if self.state == TreeState::Init {
            self.prepare()?;
        }
        if self.state == TreeState::Ready {
            self.launch()?;
        }

        let mut manifest = RunManifest::new(self.config.seed, now_ms());
        let mut digest = StreamDigest::new();
        loop {
            let buffer = self.get_next_buffer()?;
            if buffer.is_eos() {
                break;
            }
            if buffer.is_eoe() {
                manifest.epochs += 1;
                continue;
            }
            manifest.buffers += 1;
            manifest.rows += buffer.num_rows() as u64;
            digest.update(buffer.rows())?;
        }
        self.join()?;

        let manifest = manifest.finish(now_ms(), Some(digest.finalize()));
        emit_span(
            "run_finished",
            &[
                ("buffers", manifest.buffers.to_string()),
                ("rows", manifest.rows.to_string()),
                ("epochs", manifest.epochs.to_string()),
                ("duration_ms", manifest.duration_ms().to_string()),
            ],
        );
        Ok(manifest)
    }

    /// Unblock every waiting connector call. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Wait for every worker. Reports the first recorded worker failure.
    pub fn join(&mut self) -> Result<()> {
        let mut panicked = None;
        for worker in self.workers.drain(..) {
            if worker.handle.join().is_err() && panicked.is_none() {
                panicked = Some(ExecError::WorkerPanicked { op: worker.label });
            }
        }
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        match panicked {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Depth-first dump of the tree, one operator per line.
    pub fn print(&self, verbose: bool) -> String {
        let mut out = format!("ExecutionTree state={} ops={}\n", self.state, self.ops.len());
        if let Some(root) = &self.root {
            print_node(root, 0, verbose, &mut out);
        }
        out
    }

    fn spawn_worker(&mut self, op: Arc<dyn DatasetOp>, worker_id: usize) -> Result<()> {
        let label = op.base().label(op.name());
        let guard = WorkerGuard {
            op: Arc::clone(&op),
            worker_id,
            label: label.clone(),
            shutdown: self.shutdown.clone(),
            failure: Arc::clone(&self.failure),
        };

        let handle = thread::Builder::new()
            .name(format!("{label}-w{worker_id}"))
            .spawn(move || {
                tracing::debug!(op = %guard.label, worker_id, "worker started");
                let result = guard.op.run(worker_id);
                match result {
                    Ok(()) => tracing::debug!(op = %guard.label, worker_id, "worker finished"),
                    Err(ExecError::Interrupted) => {
                        tracing::debug!(op = %guard.label, worker_id, "worker interrupted")
                    }
                    Err(err) => guard.fail(err),
                }
            })
            .map_err(|e| {
                ExecError::UnexpectedState(format!("failed to spawn worker for {label}: {e}"))
            })?;

        self.workers.push(Worker { label, handle });
        Ok(())
    }

    fn take_failure(&self) -> Option<ExecError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn require_root(&self) -> Result<Arc<dyn DatasetOp>> {
        self.root
            .clone()
            .ok_or_else(|| ExecError::Structural("tree has no root".into()))
    }

    fn owned(&self, op: &dyn DatasetOp) -> Result<Arc<dyn DatasetOp>> {
        let arc = op.base().this()?;
        if self.ops.iter().any(|o| Arc::ptr_eq(o, &arc)) {
            Ok(arc)
        } else {
            Err(ExecError::Structural(format!(
                "{} belongs to another tree",
                op.base().label(op.name())
            )))
        }
    }

    fn expect_state(&self, want: TreeState, action: &str) -> Result<()> {
        if self.state == want {
            Ok(())
        } else {
            Err(ExecError::Structural(format!(
                "{action} requires a tree in state {want}, found {}",
                self.state
            )))
        }
    }
}

impl Drop for ExecutionTree {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.handle.join();
        }
    }
}

/// Closes the worker's lane when the worker exits, panics included.
struct WorkerGuard {
    op: Arc<dyn DatasetOp>,
    worker_id: usize,
    label: String,
    shutdown: ShutdownSignal,
    failure: FailureSlot,
}

impl WorkerGuard {
    fn fail(&self, err: ExecError) {
        tracing::warn!(op = %self.label, worker_id = self.worker_id, error = %err, "worker failed");
        {
            let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.shutdown.shutdown();
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.fail(ExecError::WorkerPanicked {
                op: self.label.clone(),
            });
        }
        if let Ok(connector) = self.op.base().out_connector() {
            connector.close_lane(self.worker_id);
        }
    }
}

/// Returns the number of operators visited.
fn prepare_node(op: &Arc<dyn DatasetOp>, ctx: &mut PrepareContext) -> Result<usize> {
    ctx.enter(op.prepare_flags());
    let result = (|| -> Result<usize> {
        let mut visited = 1;
        for child in op.base().children()? {
            visited += prepare_node(&child, ctx)?;
        }
        op.prepare_node_action(ctx)?;
        Ok(visited)
    })();
    ctx.exit();
    result
}

fn print_node(op: &Arc<dyn DatasetOp>, depth: usize, verbose: bool, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&op.print(verbose));
    out.push('\n');
    if let Ok(children) = op.base().children() {
        for child in &children {
            print_node(child, depth + 1, verbose, out);
        }
    }
}
