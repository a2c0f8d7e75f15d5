//! Pipeline construction, validation, and lifecycle.
//!
//! A [`Pipeline`] owns the whole DAG: it validates the node set,
//! derives successor edges from each node's gate, wires mailboxes,
//! and manages worker lifecycle in topological order.

use itertools::Itertools;
use petgraph::{algo::toposort, graphmap::GraphMap, Directed};
use std::{
	collections::HashMap,
	fmt::Debug,
	sync::Arc,
	time::Duration,
};
use tracing::debug;

use crate::{
	api::{EventLog, MetadataStore, NodeContext, TracingLog},
	barrier::BarrierWorker,
	errors::PipelineError,
	labels::NodeId,
	message::{Mailbox, MailboxSender},
	node::{Node, NodeHandle, NodeRole, NodeShared, NodeWorker, TriggerHandle},
	signal::SignalExpr,
	status::Status,
};

/// Pipeline runner configuration.
pub struct PipelineConfig {
	/// How long workers sleep between idle cycles
	pub tick: Duration,

	/// The logging sink bound to every node
	pub log: Arc<dyn EventLog>,

	/// The metadata collaborator bound to every node, if any
	pub metadata: Option<Arc<dyn MetadataStore>>,
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			tick: Duration::from_millis(10),
			log: Arc::new(TracingLog),
			metadata: None,
		}
	}
}

impl Debug for PipelineConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PipelineConfig")
			.field("tick", &self.tick)
			.field("metadata", &self.metadata.is_some())
			.finish()
	}
}

enum WorkerSlot {
	Node(NodeWorker),
	Barrier(BarrierWorker),
}

/// A validated pipeline.
///
/// The topology is fixed at construction: no cycles, successors
/// derived from predecessor relationships and ordered by name.
/// `launch()` starts one worker thread per node in topological order;
/// `terminate()` stops them in reverse, joining each before moving on
/// to its predecessors — successors are the ones parked in their
/// signal gates, so they must exit first or their predecessors would
/// wait on acknowledgements that never come.
pub struct Pipeline {
	/// Node handles, in topological order
	handles: Vec<NodeHandle>,

	/// Unlaunched workers, aligned with `handles`
	slots: Vec<Option<WorkerSlot>>,
}

impl Debug for Pipeline {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Pipeline")
			.field("nodes", &self.handles.iter().map(|h| h.name()).collect::<Vec<_>>())
			.finish()
	}
}

impl Pipeline {
	/// Validate a node set and wire it into a pipeline.
	///
	/// Rejects duplicate names, gates with empty combinators, gates
	/// referencing unknown nodes, and dependency cycles.
	pub fn new(nodes: Vec<Node>, config: PipelineConfig) -> Result<Self, PipelineError> {
		if let Some(dup) = nodes.iter().map(|n| n.name.clone()).duplicates().next() {
			return Err(PipelineError::DuplicateNode { node: dup });
		}

		let index: HashMap<NodeId, usize> = nodes
			.iter()
			.enumerate()
			.map(|(i, n)| (n.name.clone(), i))
			.collect();

		// Combine each node's listened expressions into its gate and
		// derive its predecessor set from the gate's leaves.
		let mut gates: Vec<Option<SignalExpr>> = Vec::with_capacity(nodes.len());
		let mut preds: Vec<Vec<NodeId>> = Vec::with_capacity(nodes.len());
		for node in &nodes {
			for expr in &node.listens {
				if let Err(operator) = expr.check_arity() {
					return Err(PipelineError::MalformedGate {
						node: node.name.clone(),
						operator,
					});
				}
			}

			let gate = match node.listens.len() {
				0 => None,
				1 => Some(node.listens[0].clone()),
				_ => Some(SignalExpr::And(node.listens.clone())),
			};

			let leaves = gate.as_ref().map(|g| g.nodes()).unwrap_or_default();
			for leaf in &leaves {
				if !index.contains_key(leaf) {
					return Err(PipelineError::UnknownGateNode {
						node: node.name.clone(),
						referenced: leaf.clone(),
					});
				}
			}

			gates.push(gate);
			// BTreeSet iteration gives predecessors ordered by name.
			preds.push(leaves.into_iter().collect());
		}

		// Check for cycles and fix the topological order.
		let mut graph = GraphMap::<usize, (), Directed>::new();
		for i in 0..nodes.len() {
			graph.add_node(i);
		}
		for (i, node_preds) in preds.iter().enumerate() {
			for p in node_preds {
				graph.add_edge(index[p], i, ());
			}
		}
		let order = toposort(&graph, None).map_err(|_| PipelineError::InvalidNodeDependency)?;

		// Successors are graph-derived and ordered by name.
		let mut succs: Vec<Vec<NodeId>> = vec![Vec::new(); nodes.len()];
		for (i, node_preds) in preds.iter().enumerate() {
			for p in node_preds {
				succs[index[p]].push(nodes[i].name.clone());
			}
		}
		for s in &mut succs {
			s.sort();
		}

		// Wire channels: every node owns an inbox (fed by its
		// predecessors) and an ack box (fed by its successors).
		let shared: Vec<Arc<NodeShared>> = (0..nodes.len()).map(|_| NodeShared::new()).collect();
		let mut inboxes: Vec<Option<Mailbox>> = (0..nodes.len()).map(|_| Some(Mailbox::new())).collect();
		let mut ackboxes: Vec<Option<Mailbox>> =
			(0..nodes.len()).map(|_| Some(Mailbox::new())).collect();
		let inbox_tx: Vec<MailboxSender> =
			inboxes.iter().map(|m| m.as_ref().unwrap().sender()).collect();
		let ack_tx: Vec<MailboxSender> =
			ackboxes.iter().map(|m| m.as_ref().unwrap().sender()).collect();

		let mut built: Vec<Option<(NodeHandle, WorkerSlot)>> =
			(0..nodes.len()).map(|_| None).collect();

		for (i, node) in nodes.into_iter().enumerate() {
			let successors: Vec<(NodeId, MailboxSender)> = succs[i]
				.iter()
				.map(|name| (name.clone(), inbox_tx[index[name]].clone()))
				.collect();
			let predecessors: Vec<(NodeId, MailboxSender)> = preds[i]
				.iter()
				.map(|name| (name.clone(), ack_tx[index[name]].clone()))
				.collect();

			let handle = NodeHandle {
				name: node.name.clone(),
				kind: node.kind,
				shared: shared[i].clone(),
				join: None,
			};

			let slot = match node.role {
				NodeRole::Worker(behavior) => {
					let ctx = NodeContext::new(
						node.name.clone(),
						node.signal_kind.clone(),
						preds[i].clone(),
						succs[i].clone(),
						config.log.clone(),
						config.metadata.clone(),
						TriggerHandle {
							shared: shared[i].clone(),
						},
					);
					WorkerSlot::Node(NodeWorker {
						name: node.name,
						signal_kind: node.signal_kind,
						auto_trigger: node.auto_trigger,
						gate: gates[i].take(),
						shared: shared[i].clone(),
						inbox: inboxes[i].take().unwrap(),
						acks: ackboxes[i].take().unwrap(),
						successors,
						predecessors,
						behavior,
						ctx,
						tick: config.tick,
					})
				}
				NodeRole::Barrier(kind) => WorkerSlot::Barrier(BarrierWorker {
					name: node.name,
					signal_kind: node.signal_kind,
					kind,
					shared: shared[i].clone(),
					inbox: inboxes[i].take().unwrap(),
					acks: ackboxes[i].take().unwrap(),
					successors,
					predecessors,
					log: config.log.clone(),
					tick: config.tick,
				}),
			};

			built[i] = Some((handle, slot));
		}

		// Arrange everything in topological order.
		let mut handles = Vec::with_capacity(built.len());
		let mut slots = Vec::with_capacity(built.len());
		for i in order {
			let (handle, slot) = built[i].take().unwrap();
			handles.push(handle);
			slots.push(Some(slot));
		}

		Ok(Self { handles, slots })
	}

	/// Start every node, in topological order, each on its own
	/// worker thread.
	pub fn launch(&mut self) {
		for (handle, slot) in self.handles.iter_mut().zip(self.slots.iter_mut()) {
			let Some(worker) = slot.take() else { continue };

			debug!(source = "pipeline", summary = "Launching node", node = %handle.name);
			let join = std::thread::Builder::new()
				.name(format!("node: {}", handle.name))
				.spawn(move || match worker {
					WorkerSlot::Node(w) => w.run(),
					WorkerSlot::Barrier(b) => b.run(),
				})
				// Spawning fails only when the OS is out of threads.
				.unwrap();
			handle.join = Some(join);
		}
	}

	/// Stop every node, in reverse topological order, joining each
	/// worker before signaling its predecessors.
	pub fn terminate(&mut self) {
		for handle in self.handles.iter_mut().rev() {
			handle.shared.status.stop();
			if let Some(join) = handle.join.take() {
				debug!(source = "pipeline", summary = "Stopping node", node = %handle.name);
				let _ = join.join();
			}
		}
	}

	/// Pause every node at its next hook boundary.
	pub fn pause(&self) {
		for handle in &self.handles {
			handle.pause();
		}
	}

	/// Resume every paused node.
	pub fn resume(&self) {
		for handle in &self.handles {
			handle.resume();
		}
	}

	/// The current status of every node.
	pub fn status(&self) -> HashMap<NodeId, Status> {
		self.handles
			.iter()
			.map(|h| (h.name.clone(), h.status()))
			.collect()
	}

	/// Look up one node's handle by name.
	pub fn node(&self, name: &NodeId) -> Option<&NodeHandle> {
		self.handles.iter().find(|h| &h.name == name)
	}

	/// Every node handle, in topological order.
	pub fn nodes(&self) -> &[NodeHandle] {
		&self.handles
	}

	/// The node names in the order workers are started.
	pub fn topological_order(&self) -> Vec<NodeId> {
		self.handles.iter().map(|h| h.name.clone()).collect()
	}
}

impl Drop for Pipeline {
	fn drop(&mut self) {
		self.terminate();
	}
}
