//! Helpful types

use serde::{Deserialize, Serialize};
use smartstring::{LazyCompact, SmartString};
use std::fmt::Display;

/// A pipeline node's id.
///
/// This is the node's identity everywhere: hashing, logging,
/// and signal routing all key on it.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeId {
	x: SmartString<LazyCompact>,
}

impl NodeId {
	/// Make a new node id
	pub fn new(id: &str) -> Self {
		Self { x: id.into() }
	}

	/// get the id
	pub fn id(&self) -> &SmartString<LazyCompact> {
		&self.x
	}
}

impl Display for NodeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.x.fmt(f)
	}
}

impl From<String> for NodeId {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

impl From<&str> for NodeId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// The signal kind every node emits unless configured otherwise.
pub const DEFAULT_SIGNAL: &str = "DEFAULT_SIGNAL";
