//! The artifact store: a directory of files tracked by a JSON index.
//!
//! The index is the resource payload: downstream nodes read it
//! through the shared-resource protocol while the store defers state
//! promotion until every declared reader has seen the current
//! snapshot.

use serde::{Deserialize, Serialize};
use std::{
	fs,
	path::{Path, PathBuf},
	sync::Arc,
	time::{Duration, SystemTime, UNIX_EPOCH},
};
use walkdir::WalkDir;

use mill_pipeline::{EntryState, NodeBehavior, NodeContext, ResourceError, SharedResource};

use crate::watch::DirObserver;

fn timestamp() -> String {
	// Seconds since the epoch; the index only needs ordering.
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
		.to_string()
}

/// One file tracked by the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
	/// Where the file lives
	pub filepath: PathBuf,

	/// Where the file is in the new/current/old lifecycle
	pub state: EntryState,

	/// When the file was first tracked
	pub created_at: String,
}

/// The JSON document describing an artifact directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
	/// The node that owns this index
	pub node: String,

	/// The directory being tracked
	pub resource_path: PathBuf,

	/// When the index was first built
	pub initialized_at: String,

	/// Every tracked file
	pub files: Vec<FileEntry>,
}

impl ArtifactIndex {
	/// An empty index for the given directory.
	pub fn new(node: &str, resource_path: PathBuf) -> Self {
		Self {
			node: node.to_string(),
			resource_path,
			initialized_at: timestamp(),
			files: Vec::new(),
		}
	}

	/// Is this path already tracked?
	pub fn is_tracked(&self, path: &Path) -> bool {
		self.files.iter().any(|f| f.filepath == path)
	}

	/// Track a file. Returns `false` if it was already tracked.
	pub fn track(&mut self, filepath: PathBuf, state: EntryState) -> bool {
		if self.is_tracked(&filepath) {
			return false;
		}
		self.files.push(FileEntry {
			filepath,
			state,
			created_at: timestamp(),
		});
		true
	}

	/// Advance the lifecycle: `current` entries become `old`, then
	/// `new` entries become `current`. Returns how many entries were
	/// promoted to `current`.
	pub fn promote(&mut self) -> usize {
		for entry in &mut self.files {
			if entry.state == EntryState::Current {
				entry.state = EntryState::Old;
			}
		}
		let mut promoted = 0;
		for entry in &mut self.files {
			if entry.state == EntryState::New {
				entry.state = EntryState::Current;
				promoted += 1;
			}
		}
		promoted
	}

	/// How many entries are in the given state.
	pub fn count(&self, state: EntryState) -> usize {
		self.files.iter().filter(|f| f.state == state).count()
	}

	/// Read an index document from disk.
	pub fn load(path: &Path) -> anyhow::Result<Self> {
		let text = fs::read_to_string(path)?;
		Ok(serde_json::from_str(&text)?)
	}

	/// Write this index document to disk, pretty-printed.
	pub fn save(&self, path: &Path) -> anyhow::Result<()> {
		fs::write(path, serde_json::to_string_pretty(self)?)?;
		Ok(())
	}
}

/// A resource behavior tracking a directory of artifacts.
///
/// Setup scans the directory, builds (or reloads) the index, and
/// starts a [`DirObserver`] wired to the node's trigger. Each
/// execute absorbs unseen files as `new`, then promotes the
/// lifecycle under the await-drained guard and persists the index.
/// Clone [`resource`](Self::resource) into downstream behaviors so
/// they read the index through the protocol.
pub struct ArtifactStore {
	root: PathBuf,
	index_path: PathBuf,
	init_state: EntryState,
	poll: Duration,
	drain_timeout: Duration,
	resource: Arc<SharedResource<ArtifactIndex>>,
	observer: Option<DirObserver>,
	published: bool,
}

impl ArtifactStore {
	/// Track `root`, persisting the index document at `index_path`.
	pub fn new(root: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Self {
		let root = root.into();
		Self {
			resource: Arc::new(SharedResource::new(ArtifactIndex::new("", root.clone()))),
			root,
			index_path: index_path.into(),
			init_state: EntryState::New,
			poll: Duration::from_millis(100),
			drain_timeout: Duration::from_secs(5),
			observer: None,
			published: false,
		}
	}

	/// The state given to files present at setup. Must be `New` or
	/// `Old`.
	pub fn init_state(mut self, state: EntryState) -> Self {
		self.init_state = state;
		self
	}

	/// How often the directory observer polls.
	pub fn poll_interval(mut self, interval: Duration) -> Self {
		self.poll = interval;
		self
	}

	/// How long a promotion waits for readers to drain before the
	/// cycle is reported as a failure.
	pub fn drain_timeout(mut self, timeout: Duration) -> Self {
		self.drain_timeout = timeout;
		self
	}

	/// The shared index, for wiring into downstream behaviors.
	pub fn resource(&self) -> Arc<SharedResource<ArtifactIndex>> {
		self.resource.clone()
	}

	/// Every file under the root, excluding the index document.
	fn scan(&self) -> Vec<PathBuf> {
		WalkDir::new(&self.root)
			.into_iter()
			.filter_map(Result::ok)
			.filter(|e| e.file_type().is_file())
			.map(|e| e.path().to_path_buf())
			.filter(|p| *p != self.index_path)
			.collect()
	}

	/// Track every unseen file as `new`, reporting additions to the
	/// metadata collaborator.
	fn absorb_new(&self, ctx: &NodeContext) -> anyhow::Result<Vec<PathBuf>> {
		let paths = self.scan();
		let added = self.resource.access(|idx| {
			paths
				.into_iter()
				.filter(|p| idx.track(p.clone(), EntryState::New))
				.collect::<Vec<_>>()
		})?;

		for path in &added {
			ctx.log()
				.info(&format!("node '{}': tracking {}", ctx.name(), path.display()));
			if let Some(meta) = ctx.metadata() {
				meta.create_entry(ctx.name(), &path.to_string_lossy(), EntryState::New, None)?;
			}
		}
		Ok(added)
	}
}

impl NodeBehavior for ArtifactStore {
	fn setup(&mut self, ctx: &NodeContext) -> anyhow::Result<()> {
		if self.init_state == EntryState::Current {
			anyhow::bail!("init_state must be `new` or `old`, not `current`");
		}

		fs::create_dir_all(&self.root)?;

		let mut index = if self.index_path.exists() {
			ArtifactIndex::load(&self.index_path)?
		} else {
			ArtifactIndex::new(ctx.name().id(), self.root.clone())
		};

		let mut added = Vec::new();
		for path in self.scan() {
			if index.track(path.clone(), self.init_state) {
				added.push(path);
			}
		}
		index.save(&self.index_path)?;

		if let Some(meta) = ctx.metadata() {
			meta.create_resource_tracker(ctx.name())?;
			for path in &added {
				meta.create_entry(
					ctx.name(),
					&path.to_string_lossy(),
					self.init_state,
					None,
				)?;
			}
		}

		self.resource.setup(|idx| *idx = index);
		self.resource.set_expected_readers(ctx.successors().len());

		let trigger = ctx.trigger_handle();
		self.observer = Some(DirObserver::spawn(
			self.root.clone(),
			self.poll,
			vec![self.index_path.clone()],
			move || trigger.trigger(),
		));

		ctx.log().info(&format!(
			"node '{}': observing {}",
			ctx.name(),
			self.root.display()
		));
		Ok(())
	}

	fn execute(&mut self, ctx: &NodeContext) -> anyhow::Result<bool> {
		self.absorb_new(ctx)?;

		if !self.published {
			// Nothing downstream has observed the index yet, so the
			// first promotion needs no drain.
			self.resource.access(|idx| idx.promote())?;
			self.published = true;
		} else {
			match self
				.resource
				.update_within(self.drain_timeout, |idx| idx.promote())
			{
				Ok(_) => {}
				Err(ResourceError::DrainTimeout { waited }) => {
					ctx.log().error(&format!(
						"node '{}': readers did not drain within {waited:?}; state not promoted",
						ctx.name()
					));
					return Ok(false);
				}
				Err(e) => return Err(e.into()),
			}
		}

		let snapshot = self.resource.access(|idx| idx.clone())?;
		snapshot.save(&self.index_path)?;
		Ok(true)
	}

	fn on_exit(&mut self, ctx: &NodeContext) -> anyhow::Result<()> {
		if let Some(mut observer) = self.observer.take() {
			observer.stop();
		}
		let snapshot = self.resource.access(|idx| idx.clone()).ok();
		self.resource.close();
		ctx.log()
			.info(&format!("node '{}': observer stopped", ctx.name()));
		if let Some(snapshot) = snapshot {
			snapshot.save(&self.index_path)?;
		}
		Ok(())
	}
}
