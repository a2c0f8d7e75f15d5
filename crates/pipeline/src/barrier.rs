//! Synchronization barrier nodes.
//!
//! A barrier sits between a producer group and a consumer group and
//! runs a four-phase rendezvous: wait for the producers (fan-in),
//! signal the consumers (fan-out), wait for the consumers'
//! back-signals (back-ack), then release the producers. Resource
//! nodes upstream of a barrier use the release as a reliable latch:
//! when it arrives, every consumer has finished with the current
//! snapshot.

use smartstring::{LazyCompact, SmartString};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tracing::debug;

use crate::{
	api::EventLog,
	labels::NodeId,
	message::{Mailbox, MailboxSender, Message, Outcome},
	node::NodeShared,
	status::Status,
};

/// How many signals satisfy one side of a rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quorum {
	/// Every node on this side must signal SUCCESS
	All,

	/// One SUCCESS from this side is enough
	Any,
}

impl Quorum {
	fn satisfied(&self, arrived: usize, expected: usize) -> bool {
		match self {
			Self::All => arrived >= expected,
			Self::Any => arrived >= 1 || expected == 0,
		}
	}
}

/// The rendezvous discipline of a barrier node.
///
/// The first word names the fan-in quorum over predecessors, the
/// second the back-ack quorum over successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierKind {
	/// All predecessors in, all successors back
	AndAnd,

	/// All predecessors in, any successor back
	AndOr,

	/// Any predecessor in, all successors back
	OrAnd,

	/// Any predecessor in, any successor back
	OrOr,
}

impl BarrierKind {
	/// The quorum applied to predecessor signals (fan-in).
	pub fn fan_in(&self) -> Quorum {
		match self {
			Self::AndAnd | Self::AndOr => Quorum::All,
			Self::OrAnd | Self::OrOr => Quorum::Any,
		}
	}

	/// The quorum applied to successor back-signals (back-ack).
	pub fn back_ack(&self) -> Quorum {
		match self {
			Self::AndAnd | Self::OrAnd => Quorum::All,
			Self::AndOr | Self::OrOr => Quorum::Any,
		}
	}
}

/// A barrier node's worker. Runs the rendezvous loop on its own
/// thread; has no user hooks.
pub(crate) struct BarrierWorker {
	pub(crate) name: NodeId,
	pub(crate) signal_kind: SmartString<LazyCompact>,
	pub(crate) kind: BarrierKind,
	pub(crate) shared: Arc<NodeShared>,

	/// Signals from predecessors
	pub(crate) inbox: Mailbox,

	/// Back-signals from successors
	pub(crate) acks: Mailbox,

	pub(crate) successors: Vec<(NodeId, MailboxSender)>,
	pub(crate) predecessors: Vec<(NodeId, MailboxSender)>,

	pub(crate) log: Arc<dyn EventLog>,
	pub(crate) tick: Duration,
}

impl BarrierWorker {
	pub(crate) fn run(self) {
		if !self.shared.status.begin_init() {
			self.shared.status.set(Status::Exited);
			return;
		}
		self.shared.status.finish_init();

		let mut arrived: HashSet<NodeId> = HashSet::new();
		let mut acked: HashSet<NodeId> = HashSet::new();

		loop {
			// Fan-in: wait for the producer side.
			if !self.wait_quorum(&self.inbox, self.kind.fan_in(), self.predecessors.len(), &mut arrived)
			{
				break;
			}
			self.log.info(&format!(
				"barrier '{}': predecessors ready, releasing successors",
				self.name
			));
			self.send_success(&self.successors);

			// Back-ack: wait for the consumer side to finish.
			if !self.wait_quorum(&self.acks, self.kind.back_ack(), self.successors.len(), &mut acked)
			{
				break;
			}
			self.log.info(&format!(
				"barrier '{}': successors done, releasing predecessors",
				self.name
			));
			self.send_success(&self.predecessors);

			arrived.clear();
			acked.clear();
		}

		self.shared.status.set(Status::Exited);
		debug!(source = "barrier", summary = "Worker exited", node = %self.name);
	}

	/// Wait until `quorum` is satisfied over `mailbox`, accumulating
	/// SUCCESS senders into `seen`. Returns `false` if a stop request
	/// arrived instead.
	fn wait_quorum(
		&self,
		mailbox: &Mailbox,
		quorum: Quorum,
		expected: usize,
		seen: &mut HashSet<NodeId>,
	) -> bool {
		loop {
			self.shared.status.pause_gate();
			if self.shared.status.get() == Status::Stopping {
				return false;
			}

			for msg in mailbox.try_drain() {
				if msg.outcome() == Outcome::Success {
					seen.insert(msg.sender().clone());
				}
			}
			if quorum.satisfied(seen.len(), expected) {
				return true;
			}

			std::thread::sleep(self.tick);
		}
	}

	fn send_success(&self, targets: &[(NodeId, MailboxSender)]) {
		for (target, tx) in targets {
			tx.put(Message::new(
				self.name.clone(),
				self.signal_kind.clone(),
				Outcome::Success,
			));
			debug!(
				source = "barrier",
				summary = "Sent signal",
				node = %self.name,
				to = %target,
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kind_quorums() {
		assert_eq!(BarrierKind::AndAnd.fan_in(), Quorum::All);
		assert_eq!(BarrierKind::AndAnd.back_ack(), Quorum::All);
		assert_eq!(BarrierKind::AndOr.back_ack(), Quorum::Any);
		assert_eq!(BarrierKind::OrAnd.fan_in(), Quorum::Any);
		assert_eq!(BarrierKind::OrOr.back_ack(), Quorum::Any);
	}

	#[test]
	fn quorum_satisfaction() {
		assert!(Quorum::All.satisfied(3, 3));
		assert!(!Quorum::All.satisfied(2, 3));
		assert!(Quorum::All.satisfied(0, 0));
		assert!(Quorum::Any.satisfied(1, 3));
		assert!(!Quorum::Any.satisfied(0, 3));
		assert!(Quorum::Any.satisfied(0, 0));
	}
}
