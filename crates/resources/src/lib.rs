//! Filesystem-backed resource nodes: a JSON-indexed artifact store
//! and the directory observer that triggers it.

pub mod artifact;
pub mod watch;

pub use artifact::{ArtifactIndex, ArtifactStore, FileEntry};
pub use watch::DirObserver;
