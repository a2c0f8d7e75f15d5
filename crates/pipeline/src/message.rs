//! Messages nodes send each other, and the queues that carry them

use crossbeam::channel::{unbounded, Receiver, Sender};
use smartstring::{LazyCompact, SmartString};
use std::time::SystemTime;

use crate::labels::NodeId;

/// The outcome a node reports after one execute phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	/// The execute hook returned true
	Success,

	/// The execute hook returned false or failed
	Failure,
}

impl Outcome {
	/// Is this [`Outcome::Success`]?
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Success)
	}
}

/// One signal, sent from a node to a successor's inbox
/// (or, as a back-signal, to a predecessor's ack box).
///
/// Messages are immutable once built.
#[derive(Debug, Clone)]
pub struct Message {
	/// The node that sent this message
	sender: NodeId,

	/// The sender's signal kind
	kind: SmartString<LazyCompact>,

	/// When this message was built
	timestamp: SystemTime,

	/// What the sender's execute phase produced
	outcome: Outcome,
}

impl Message {
	/// Build a message stamped with the current time.
	pub fn new(sender: NodeId, kind: impl Into<SmartString<LazyCompact>>, outcome: Outcome) -> Self {
		Self {
			sender,
			kind: kind.into(),
			timestamp: SystemTime::now(),
			outcome,
		}
	}

	/// The node that sent this message
	pub fn sender(&self) -> &NodeId {
		&self.sender
	}

	/// The sender's signal kind
	pub fn kind(&self) -> &str {
		&self.kind
	}

	/// When this message was built
	pub fn timestamp(&self) -> SystemTime {
		self.timestamp
	}

	/// What the sender's execute phase produced
	pub fn outcome(&self) -> Outcome {
		self.outcome
	}
}

/// A node's FIFO queue of pending messages.
///
/// Unbounded and thread-safe. Messages from one sender arrive in send
/// order; interleaving across senders is unspecified.
#[derive(Debug)]
pub struct Mailbox {
	send: Sender<Message>,
	recv: Receiver<Message>,
}

impl Mailbox {
	/// Make a new, empty mailbox.
	pub fn new() -> Self {
		let (send, recv) = unbounded();
		Self { send, recv }
	}

	/// A handle other nodes use to put messages here.
	pub fn sender(&self) -> MailboxSender {
		MailboxSender {
			send: self.send.clone(),
		}
	}

	/// Enqueue a message. Never blocks.
	pub fn put(&self, msg: Message) {
		// The receiving half lives as long as we do.
		self.send.send(msg).unwrap();
	}

	/// Return and remove every message currently queued. Never blocks.
	pub fn try_drain(&self) -> Vec<Message> {
		self.recv.try_iter().collect()
	}
}

impl Default for Mailbox {
	fn default() -> Self {
		Self::new()
	}
}

/// The sending half of a [`Mailbox`], handed to other nodes.
#[derive(Debug, Clone)]
pub struct MailboxSender {
	send: Sender<Message>,
}

impl MailboxSender {
	/// Enqueue a message. Never blocks.
	///
	/// Delivery to a node that has already exited and dropped its
	/// mailbox is silently discarded.
	pub fn put(&self, msg: Message) {
		let _ = self.send.send(msg);
	}
}
