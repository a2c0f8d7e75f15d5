//! Errors we may encounter when building or talking to a pipeline

use std::{error::Error, fmt::Display};

use crate::labels::NodeId;

/// An error we encounter when a pipeline's configuration is invalid.
///
/// These are raised synchronously from [`Pipeline::new`](crate::pipeline::Pipeline::new)
/// and are terminal: no worker is ever started.
#[derive(Debug)]
pub enum PipelineError {
	/// The node dependencies contain a cycle.
	InvalidNodeDependency,

	/// Two nodes were given the same name.
	DuplicateNode {
		/// The name used twice
		node: NodeId,
	},

	/// A gate expression references a node that isn't in the pipeline.
	UnknownGateNode {
		/// The node whose gate is broken
		node: NodeId,
		/// The name the gate references
		referenced: NodeId,
	},

	/// A gate expression contains a combinator with no operands.
	MalformedGate {
		/// The node whose gate is broken
		node: NodeId,
		/// The combinator with the empty operand list
		operator: &'static str,
	},
}

impl Error for PipelineError {}

impl Display for PipelineError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::InvalidNodeDependency => {
				write!(f, "node dependencies do not form a directed acyclic graph")
			}
			Self::DuplicateNode { node } => {
				write!(f, "two nodes share the name `{node}`")
			}
			Self::UnknownGateNode { node, referenced } => {
				write!(
					f,
					"gate of node `{node}` references `{referenced}`, which is not in the pipeline"
				)
			}
			Self::MalformedGate { node, operator } => {
				write!(
					f,
					"gate of node `{node}` has an {operator} with no operands"
				)
			}
		}
	}
}

/// An error from the metadata store collaborator.
#[derive(Debug)]
pub enum MetadataError {
	/// There is no run in progress.
	NoActiveRun,

	/// We were asked about a node with no resource tracker.
	UnknownNode {
		/// The node we couldn't find
		node: NodeId,
	},

	/// The backing store failed.
	Backend(Box<dyn Error + Send + Sync>),
}

impl MetadataError {
	/// Wrap a backing-store failure.
	pub fn backend(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
		Self::Backend(err.into())
	}
}

impl Error for MetadataError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			Self::Backend(e) => Some(e.as_ref()),
			_ => None,
		}
	}
}

impl Display for MetadataError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::NoActiveRun => write!(f, "no run is in progress"),
			Self::UnknownNode { node } => {
				write!(f, "no resource tracker exists for node `{node}`")
			}
			Self::Backend(e) => write!(f, "metadata backend error: {e}"),
		}
	}
}
