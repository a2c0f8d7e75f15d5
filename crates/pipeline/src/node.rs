//! Node construction and the per-node worker runtime.
//!
//! A [`Node`] describes one vertex of the pipeline DAG: a name, a
//! kind, a behavior, and the signal expressions it listens to. The
//! [`Pipeline`](crate::pipeline::Pipeline) turns each description
//! into a long-lived worker thread running the main loop in this
//! module.

use smartstring::{LazyCompact, SmartString};
use std::{
	fmt::Debug,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	thread::JoinHandle,
	time::Duration,
};
use tracing::debug;

use crate::{
	api::{NodeBehavior, NodeContext},
	barrier::BarrierKind,
	labels::{NodeId, DEFAULT_SIGNAL},
	message::{Mailbox, MailboxSender, Message, Outcome},
	signal::SignalExpr,
	status::{Status, StatusCell},
};

/// What kind of vertex a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
	/// Runs a user action when its gate passes
	Action,

	/// Owns mutable shared state behind the reader protocol
	Resource,

	/// A synchronization rendezvous between node groups
	Barrier,

	/// A do-nothing node used for wiring and tests
	Trivial,
}

/// A behavior that does nothing and always succeeds.
#[derive(Debug, Default)]
pub struct Succeed;

impl NodeBehavior for Succeed {}

/// A behavior that does nothing and always fails.
#[derive(Debug, Default)]
pub struct Fail;

impl NodeBehavior for Fail {
	fn execute(&mut self, _ctx: &NodeContext) -> anyhow::Result<bool> {
		Ok(false)
	}
}

pub(crate) enum NodeRole {
	Worker(Box<dyn NodeBehavior>),
	Barrier(BarrierKind),
}

impl Debug for NodeRole {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Worker(_) => write!(f, "Worker"),
			Self::Barrier(k) => write!(f, "Barrier({k:?})"),
		}
	}
}

/// A description of one pipeline node, built before the pipeline is.
///
/// ```
/// use mill_pipeline::node::Node;
/// use mill_pipeline::signal::{and_, signal};
///
/// let a = Node::succeed("a");
/// let b = Node::succeed("b");
/// let c = Node::succeed("c").listens(and_([signal("a"), signal("b")]));
/// # let _ = (a, b, c);
/// ```
#[derive(Debug)]
pub struct Node {
	pub(crate) name: NodeId,
	pub(crate) kind: NodeKind,
	pub(crate) signal_kind: SmartString<LazyCompact>,
	pub(crate) auto_trigger: bool,
	pub(crate) listens: Vec<SignalExpr>,
	pub(crate) role: NodeRole,
}

impl Node {
	fn new(name: impl Into<NodeId>, kind: NodeKind, auto_trigger: bool, role: NodeRole) -> Self {
		Self {
			name: name.into(),
			kind,
			signal_kind: DEFAULT_SIGNAL.into(),
			auto_trigger,
			listens: Vec::new(),
			role,
		}
	}

	/// An action node: runs `behavior` whenever its gate passes.
	pub fn action(name: impl Into<NodeId>, behavior: impl NodeBehavior + 'static) -> Self {
		Self::new(name, NodeKind::Action, true, NodeRole::Worker(Box::new(behavior)))
	}

	/// A resource node: externally triggered, off by default until an
	/// observer trips its trigger latch.
	pub fn resource(name: impl Into<NodeId>, behavior: impl NodeBehavior + 'static) -> Self {
		Self::new(
			name,
			NodeKind::Resource,
			false,
			NodeRole::Worker(Box::new(behavior)),
		)
	}

	/// A barrier node running the four-phase rendezvous loop.
	pub fn barrier(name: impl Into<NodeId>, kind: BarrierKind) -> Self {
		Self::new(name, NodeKind::Barrier, true, NodeRole::Barrier(kind))
	}

	/// A trivial node that always succeeds.
	pub fn succeed(name: impl Into<NodeId>) -> Self {
		Self::new(name, NodeKind::Trivial, true, NodeRole::Worker(Box::new(Succeed)))
	}

	/// A trivial node that always fails.
	pub fn fail(name: impl Into<NodeId>) -> Self {
		Self::new(name, NodeKind::Trivial, true, NodeRole::Worker(Box::new(Fail)))
	}

	/// Listen to the given signal expression. Multiple calls are
	/// AND'd together; the combined expression is this node's gate,
	/// and its leaves become this node's predecessors.
	pub fn listens(mut self, expr: impl Into<SignalExpr>) -> Self {
		self.listens.push(expr.into());
		self
	}

	/// Set the signal kind stamped on every message this node emits.
	pub fn signal_kind(mut self, kind: &str) -> Self {
		self.signal_kind = kind.into();
		self
	}

	/// Override whether this node triggers on its own each cycle.
	/// When off, the node waits for [`TriggerHandle::trigger`].
	pub fn auto_trigger(mut self, auto: bool) -> Self {
		self.auto_trigger = auto;
		self
	}

	/// This node's name.
	pub fn name(&self) -> &NodeId {
		&self.name
	}

	/// This node's kind.
	pub fn kind(&self) -> NodeKind {
		self.kind
	}
}

/// State shared between a node's worker and its handles.
#[derive(Debug)]
pub(crate) struct NodeShared {
	pub(crate) status: StatusCell,
	pub(crate) triggered: AtomicBool,
}

impl NodeShared {
	pub(crate) fn new() -> Arc<Self> {
		Arc::new(Self {
			status: StatusCell::new(),
			triggered: AtomicBool::new(false),
		})
	}
}

/// A cloneable, thread-safe handle that trips a node's trigger latch.
///
/// External observers hold one of these and call
/// [`trigger`](Self::trigger) when the outside world changes.
#[derive(Clone)]
pub struct TriggerHandle {
	pub(crate) shared: Arc<NodeShared>,
}

impl TriggerHandle {
	/// Trip the node's trigger latch. Idempotent until the node
	/// consumes the trigger.
	pub fn trigger(&self) {
		self.shared.triggered.store(true, Ordering::SeqCst);
	}
}

impl Debug for TriggerHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TriggerHandle").finish_non_exhaustive()
	}
}

/// A handle to one launched node, owned by the pipeline.
#[derive(Debug)]
pub struct NodeHandle {
	pub(crate) name: NodeId,
	pub(crate) kind: NodeKind,
	pub(crate) shared: Arc<NodeShared>,
	pub(crate) join: Option<JoinHandle<()>>,
}

impl NodeHandle {
	/// This node's name.
	pub fn name(&self) -> &NodeId {
		&self.name
	}

	/// This node's kind.
	pub fn kind(&self) -> NodeKind {
		self.kind
	}

	/// This node's current lifecycle status.
	pub fn status(&self) -> Status {
		self.shared.status.get()
	}

	/// Trip this node's trigger latch.
	pub fn trigger(&self) {
		self.shared.triggered.store(true, Ordering::SeqCst);
	}

	/// A cloneable trigger handle for external observers.
	pub fn trigger_handle(&self) -> TriggerHandle {
		TriggerHandle {
			shared: self.shared.clone(),
		}
	}

	/// Pause this node at its next hook boundary.
	pub fn pause(&self) {
		self.shared.status.pause();
	}

	/// Resume this node if paused.
	pub fn resume(&self) {
		self.shared.status.resume();
	}

	/// Request a cooperative stop.
	pub fn stop(&self) {
		self.shared.status.stop();
	}
}

/// One node's worker: owns the behavior, the mailboxes, and the
/// channel ends wired to its neighbors. Runs on its own thread.
pub(crate) struct NodeWorker {
	pub(crate) name: NodeId,
	pub(crate) signal_kind: SmartString<LazyCompact>,
	pub(crate) auto_trigger: bool,
	pub(crate) gate: Option<SignalExpr>,
	pub(crate) shared: Arc<NodeShared>,

	/// Messages from predecessors
	pub(crate) inbox: Mailbox,

	/// Back-signals from successors
	pub(crate) acks: Mailbox,

	/// Each successor's inbox, ordered by name
	pub(crate) successors: Vec<(NodeId, MailboxSender)>,

	/// Each predecessor's ack box, ordered by name
	pub(crate) predecessors: Vec<(NodeId, MailboxSender)>,

	pub(crate) behavior: Box<dyn NodeBehavior>,
	pub(crate) ctx: NodeContext,
	pub(crate) tick: Duration,
}

impl NodeWorker {
	/// The worker main loop. Consumes the worker; runs until the node
	/// reaches a terminal status.
	pub(crate) fn run(mut self) {
		if !self.shared.status.begin_init() {
			// A stop arrived before we started; setup never ran,
			// so there is nothing to unwind.
			self.shared.status.set(Status::Exited);
			return;
		}

		debug!(source = "node", summary = "Setting up", node = %self.name);
		if let Err(e) = self.behavior.setup(&self.ctx) {
			self.ctx
				.log()
				.error(&format!("node '{}' setup failed: {e:#}", self.name));
			self.shared.status.set(Status::Error);
			return;
		}
		self.ctx
			.log()
			.info(&format!("node '{}' setup complete", self.name));

		self.shared.status.finish_init();

		loop {
			match self.shared.status.get() {
				Status::Running => self.step(),
				Status::Paused => self.shared.status.pause_gate(),
				Status::Stopping => {
					if let Err(e) = self.behavior.on_exit(&self.ctx) {
						self.ctx
							.log()
							.error(&format!("node '{}' on_exit failed: {e:#}", self.name));
					}
					self.shared.status.set(Status::Exited);
				}
				_ => {}
			}

			if self.shared.status.get().is_terminal() {
				break;
			}
			std::thread::sleep(self.tick);
		}

		self.behavior.teardown(&self.ctx);
		debug!(source = "node", summary = "Worker exited", node = %self.name);
	}

	/// One pass through the execute phase. Returns early (yielding to
	/// the main loop) whenever a gate is not satisfied.
	fn step(&mut self) {
		// Keep the latest back-signal per successor visible to hooks,
		// whether or not this cycle goes anywhere.
		let acked = self.acks.try_drain();
		self.ctx.absorb_acks(acked);

		self.shared.status.pause_gate();
		if !self.behavior.pre_trigger(&self.ctx) {
			return;
		}

		if !self.auto_trigger && !self.shared.triggered.load(Ordering::SeqCst) {
			return;
		}

		if !self.ctx.predecessors().is_empty() {
			self.shared.status.pause_gate();
			let fresh = self.ctx.absorb_signals(self.inbox.try_drain());
			if fresh == 0 {
				// Nothing new since the last cycle; don't re-fire
				// on stale signals.
				return;
			}
			let open = match &self.gate {
				Some(gate) => gate.evaluate(self.ctx.received()),
				None => true,
			};
			if !open {
				return;
			}
		}

		self.shared.status.pause_gate();
		self.behavior.pre_execution(&self.ctx);

		self.shared.status.pause_gate();
		debug!(source = "node", summary = "Executing", node = %self.name);
		let outcome = match self.behavior.execute(&self.ctx) {
			Ok(true) => {
				self.shared.status.pause_gate();
				self.behavior.on_success(&self.ctx);
				Outcome::Success
			}
			Ok(false) => {
				self.shared.status.pause_gate();
				self.behavior.on_failure(&self.ctx, None);
				Outcome::Failure
			}
			Err(e) => {
				// Contained: the fault stays in this worker, and
				// downstream only ever sees a FAILURE message.
				self.ctx
					.log()
					.error(&format!("node '{}' execute failed: {e:#}", self.name));
				self.shared.status.pause_gate();
				self.behavior.on_failure(&self.ctx, Some(&e));
				Outcome::Failure
			}
		};

		self.shared.status.pause_gate();
		self.behavior.post_execution(&self.ctx);

		self.shared.status.pause_gate();
		self.emit(outcome);

		if !self.auto_trigger {
			self.shared.triggered.store(false, Ordering::SeqCst);
		}
	}

	/// Emit the outcome to every successor's inbox, then back-signal
	/// every predecessor's ack box. Emission is total: failures are
	/// sent exactly like successes.
	fn emit(&self, outcome: Outcome) {
		for (succ, tx) in &self.successors {
			tx.put(Message::new(
				self.name.clone(),
				self.signal_kind.clone(),
				outcome,
			));
			debug!(
				source = "node",
				summary = "Sent signal",
				node = %self.name,
				to = %succ,
				outcome = ?outcome,
			);
		}

		for (_, tx) in &self.predecessors {
			tx.put(Message::new(
				self.name.clone(),
				self.signal_kind.clone(),
				outcome,
			));
		}
	}
}
