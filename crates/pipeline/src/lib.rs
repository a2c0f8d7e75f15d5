//! A signal-coordinated DAG of long-lived pipeline workers.
//!
//! Each node runs on its own thread and gates its work on a boolean
//! expression over the outcome messages its predecessors send.
//! Resource nodes layer a readers/writer protocol on top so many
//! consumers can observe a consistent snapshot before the resource
//! mutates; barrier nodes synchronize whole groups with a four-phase
//! rendezvous.

#![warn(missing_docs)]

pub mod api;
pub mod barrier;
pub mod errors;
pub mod labels;
pub mod message;
pub mod node;
pub mod pipeline;
pub mod resource;
pub mod signal;
pub mod status;

pub use api::{EntryState, EventLog, MetadataStore, NodeBehavior, NodeContext, TracingLog};
pub use barrier::BarrierKind;
pub use errors::{MetadataError, PipelineError};
pub use labels::{NodeId, DEFAULT_SIGNAL};
pub use message::{Mailbox, MailboxSender, Message, Outcome};
pub use node::{Node, NodeHandle, NodeKind, TriggerHandle};
pub use pipeline::{Pipeline, PipelineConfig};
pub use resource::{ResourceError, SharedResource};
pub use signal::{and_, not_, or_, signal, xor_, SignalExpr};
pub use status::Status;
