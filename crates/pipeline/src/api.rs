//! Traits that let external code plug into the pipeline core:
//! node behaviors, logging sinks, and the metadata collaborator.

use serde::{Deserialize, Serialize};
use smartstring::{LazyCompact, SmartString};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
	errors::MetadataError,
	labels::NodeId,
	message::Message,
	node::TriggerHandle,
};

/// A minimal logging sink. Every node is bound to one at launch.
pub trait EventLog: Send + Sync {
	/// Record an informational line.
	fn info(&self, msg: &str);

	/// Record an error line.
	fn error(&self, msg: &str);
}

/// The default [`EventLog`]: forwards to the tracing macros.
#[derive(Debug, Default)]
pub struct TracingLog;

impl EventLog for TracingLog {
	fn info(&self, msg: &str) {
		tracing::info!(source = "node", "{}", msg);
	}

	fn error(&self, msg: &str) {
		tracing::error!(source = "node", "{}", msg);
	}
}

/// The lifecycle state of a tracked resource entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
	/// Created, not yet bound to a run
	New,

	/// Bound to the run in progress
	Current,

	/// A finished run consumed this entry
	Old,
}

impl EntryState {
	/// The state's name as stored by collaborators.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::New => "new",
			Self::Current => "current",
			Self::Old => "old",
		}
	}
}

impl std::fmt::Display for EntryState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The metadata store collaborator: a relational record of runs and
/// the resource entries each run consumed.
///
/// Entries are created as `new`, promoted to `current` when bound to a
/// run, and demoted to `old` when the run ends.
pub trait MetadataStore: Send + Sync {
	/// Open a new run.
	fn start_run(&self) -> Result<(), MetadataError>;

	/// Close the run in progress.
	fn end_run(&self) -> Result<(), MetadataError>;

	/// The id of the run in progress.
	fn get_run_id(&self) -> Result<i64, MetadataError>;

	/// Register a resource node so entries can be tracked against it.
	fn create_resource_tracker(&self, node: &NodeId) -> Result<(), MetadataError>;

	/// Record one entry for a resource node.
	fn create_entry(
		&self,
		node: &NodeId,
		location: &str,
		state: EntryState,
		run_id: Option<i64>,
	) -> Result<(), MetadataError>;

	/// Bind every unbound `new` entry to the run in progress,
	/// promoting it to `current`.
	fn add_run_id(&self) -> Result<(), MetadataError>;

	/// Stamp an end time on the current run's entries,
	/// demoting them to `old`.
	fn add_end_time(&self) -> Result<(), MetadataError>;

	/// How many entries a resource node has in the given state.
	fn get_num_entries(&self, node: &NodeId, state: EntryState) -> Result<i64, MetadataError>;
}

/// Everything a node's hooks may look at while running.
///
/// One context is built per node at launch and handed to every hook
/// invocation. The worker refreshes `received` and the ack map between
/// hooks; hooks themselves get shared access only.
pub struct NodeContext {
	name: NodeId,
	signal_kind: SmartString<LazyCompact>,
	predecessors: Vec<NodeId>,
	successors: Vec<NodeId>,
	log: Arc<dyn EventLog>,
	metadata: Option<Arc<dyn MetadataStore>>,
	trigger: TriggerHandle,

	/// Latest message per predecessor, drained from the inbox
	received: HashMap<NodeId, Message>,

	/// Latest back-signal per successor
	acks: HashMap<NodeId, Message>,
}

impl NodeContext {
	#[allow(clippy::too_many_arguments)]
	pub(crate) fn new(
		name: NodeId,
		signal_kind: SmartString<LazyCompact>,
		predecessors: Vec<NodeId>,
		successors: Vec<NodeId>,
		log: Arc<dyn EventLog>,
		metadata: Option<Arc<dyn MetadataStore>>,
		trigger: TriggerHandle,
	) -> Self {
		Self {
			name,
			signal_kind,
			predecessors,
			successors,
			log,
			metadata,
			trigger,
			received: HashMap::new(),
			acks: HashMap::new(),
		}
	}

	/// This node's name.
	pub fn name(&self) -> &NodeId {
		&self.name
	}

	/// The signal kind this node emits.
	pub fn signal_kind(&self) -> &str {
		&self.signal_kind
	}

	/// The nodes this node listens to, ordered by name.
	pub fn predecessors(&self) -> &[NodeId] {
		&self.predecessors
	}

	/// The nodes listening to this node, ordered by name.
	pub fn successors(&self) -> &[NodeId] {
		&self.successors
	}

	/// The logging sink bound to this node.
	pub fn log(&self) -> &dyn EventLog {
		self.log.as_ref()
	}

	/// The metadata collaborator, if one was bound.
	pub fn metadata(&self) -> Option<&Arc<dyn MetadataStore>> {
		self.metadata.as_ref()
	}

	/// A cloneable handle that trips this node's trigger latch.
	///
	/// Hand this to external observers (file watchers, timers) so they
	/// can wake a node that has `auto_trigger` off.
	pub fn trigger_handle(&self) -> TriggerHandle {
		self.trigger.clone()
	}

	/// The latest message received from each predecessor.
	pub fn received(&self) -> &HashMap<NodeId, Message> {
		&self.received
	}

	/// The latest message received from the given predecessor.
	pub fn latest_from(&self, node: &NodeId) -> Option<&Message> {
		self.received.get(node)
	}

	/// The latest back-signal received from the given successor.
	pub fn ack_from(&self, node: &NodeId) -> Option<&Message> {
		self.acks.get(node)
	}

	/// Absorb drained inbox messages, latest per sender winning.
	/// Returns how many messages were absorbed.
	pub(crate) fn absorb_signals(&mut self, msgs: Vec<Message>) -> usize {
		let n = msgs.len();
		for msg in msgs {
			self.received.insert(msg.sender().clone(), msg);
		}
		n
	}

	/// Absorb drained back-signals, latest per sender winning.
	pub(crate) fn absorb_acks(&mut self, msgs: Vec<Message>) {
		for msg in msgs {
			self.acks.insert(msg.sender().clone(), msg);
		}
	}
}

/// The hooks a node runs through each cycle of its main loop.
///
/// Every method has a default: a node built from `()`-like behaviors
/// runs, succeeds, and signals. Hooks are only ever invoked from the
/// node's own worker thread, so implementations may keep plain
/// mutable state.
///
/// `execute` is the action itself. Returning `Ok(false)` is an
/// ordinary failure; returning `Err` is a contained fault — the
/// worker runs `on_failure`, emits FAILURE downstream, and keeps
/// cycling.
pub trait NodeBehavior: Send {
	/// Runs once, before the node enters its main loop.
	/// A failure here is terminal: the node lands in `Error`
	/// and never emits a message.
	fn setup(&mut self, _ctx: &NodeContext) -> anyhow::Result<()> {
		Ok(())
	}

	/// Polled every cycle before anything else. Return `false`
	/// to keep the node idle this cycle.
	fn pre_trigger(&mut self, _ctx: &NodeContext) -> bool {
		true
	}

	/// Runs after the signal gate passes, before `execute`.
	fn pre_execution(&mut self, _ctx: &NodeContext) {}

	/// The node's action. `Ok(true)` is success, `Ok(false)` failure.
	fn execute(&mut self, _ctx: &NodeContext) -> anyhow::Result<bool> {
		Ok(true)
	}

	/// Runs after `on_success`/`on_failure`, before emission.
	fn post_execution(&mut self, _ctx: &NodeContext) {}

	/// Runs when `execute` returned `Ok(true)`.
	fn on_success(&mut self, _ctx: &NodeContext) {}

	/// Runs when `execute` returned `Ok(false)` (with `None`) or
	/// failed (with the error).
	fn on_failure(&mut self, _ctx: &NodeContext, _err: Option<&anyhow::Error>) {}

	/// Runs once when the node observes a stop request, before it
	/// transitions to `Exited`. A failure here is logged; the
	/// transition proceeds regardless.
	fn on_exit(&mut self, _ctx: &NodeContext) -> anyhow::Result<()> {
		Ok(())
	}

	/// Runs after the node has exited, as the worker thread winds down.
	fn teardown(&mut self, _ctx: &NodeContext) {}
}
