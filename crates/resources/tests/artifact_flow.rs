//! The artifact store driven through a real pipeline: observer
//! trigger, index promotion, reader gating, metadata entries.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mill_metadata::SqliteMetadataStore;
use mill_pipeline::{
	signal, EntryState, MetadataStore, Node, NodeBehavior, NodeContext, NodeId, Pipeline,
	PipelineConfig, SharedResource, Status,
};
use mill_resources::{ArtifactIndex, ArtifactStore};

fn wait_for(limit: Duration, mut cond: impl FnMut() -> bool) {
	let start = Instant::now();
	while !cond() {
		if start.elapsed() > limit {
			panic!("condition not reached within {limit:?}");
		}
		thread::sleep(Duration::from_millis(10));
	}
}

/// Reads the index snapshot each time the store signals.
struct Trainer {
	resource: Arc<SharedResource<ArtifactIndex>>,
	seen: Arc<Mutex<Vec<usize>>>,
}

impl NodeBehavior for Trainer {
	fn execute(&mut self, _ctx: &NodeContext) -> anyhow::Result<bool> {
		let current = self.resource.read(|idx| idx.count(EntryState::Current))?;
		self.seen.lock().unwrap().push(current);
		Ok(true)
	}
}

#[test]
fn observer_trigger_drives_promotion_and_readers() {
	let dir = tempfile::tempdir().unwrap();
	let root = dir.path().join("data");
	let index_path = dir.path().join("index.json");
	std::fs::create_dir_all(&root).unwrap();
	std::fs::write(root.join("a.csv"), b"1").unwrap();

	let metadata: Arc<SqliteMetadataStore> =
		Arc::new(SqliteMetadataStore::create(&dir.path().join("meta.db")).unwrap());

	let store = ArtifactStore::new(&root, &index_path)
		.poll_interval(Duration::from_millis(30))
		.drain_timeout(Duration::from_secs(2));
	let resource = store.resource();
	let seen = Arc::new(Mutex::new(Vec::new()));

	let mut pipeline = Pipeline::new(
		vec![
			Node::resource("data-store", store).signal_kind("data_store"),
			Node::action(
				"train",
				Trainer {
					resource: resource.clone(),
					seen: seen.clone(),
				},
			)
			.listens(signal("data-store")),
		],
		PipelineConfig {
			tick: Duration::from_millis(5),
			metadata: Some(metadata.clone()),
			..Default::default()
		},
	)
	.unwrap();

	pipeline.launch();
	let store_id = NodeId::new("data-store");
	wait_for(Duration::from_secs(2), || {
		pipeline.node(&store_id).unwrap().status() == Status::Running
	});

	// A new artifact lands; the observer wakes the store.
	thread::sleep(Duration::from_millis(50));
	std::fs::write(root.join("b.csv"), b"2").unwrap();

	wait_for(Duration::from_secs(3), || !seen.lock().unwrap().is_empty());

	// Both files were promoted to `current` before the reader ran.
	assert_eq!(seen.lock().unwrap()[0], 2);

	// The collaborator saw both entries arrive as `new`.
	assert_eq!(
		metadata.get_num_entries(&store_id, EntryState::New).unwrap(),
		2
	);

	pipeline.terminate();
	assert_eq!(
		pipeline.node(&store_id).unwrap().status(),
		Status::Exited
	);

	// The persisted document reflects the promoted lifecycle.
	let index = ArtifactIndex::load(&index_path).unwrap();
	assert_eq!(index.node, "data-store");
	assert_eq!(index.count(EntryState::Current), 2);
	assert_eq!(index.count(EntryState::New), 0);
}

#[test]
fn index_survives_restart() {
	let dir = tempfile::tempdir().unwrap();
	let root = dir.path().join("data");
	let index_path = dir.path().join("index.json");
	std::fs::create_dir_all(&root).unwrap();
	std::fs::write(root.join("a.csv"), b"1").unwrap();

	// First life: track and promote the file.
	{
		let store = ArtifactStore::new(&root, &index_path);
		let mut pipeline = Pipeline::new(
			vec![Node::resource("data-store", store)],
			PipelineConfig {
				tick: Duration::from_millis(5),
				..Default::default()
			},
		)
		.unwrap();
		pipeline.launch();
		let store_id = NodeId::new("data-store");
		wait_for(Duration::from_secs(2), || {
			pipeline.node(&store_id).unwrap().status() == Status::Running
		});
		pipeline.node(&store_id).unwrap().trigger();
		wait_for(Duration::from_secs(2), || {
			ArtifactIndex::load(&index_path)
				.map(|idx| idx.count(EntryState::Current) == 1)
				.unwrap_or(false)
		});
		pipeline.terminate();
	}

	// Second life: the reloaded index remembers the promotion.
	let store = ArtifactStore::new(&root, &index_path);
	let resource = store.resource();
	let mut pipeline = Pipeline::new(
		vec![Node::resource("data-store", store)],
		PipelineConfig {
			tick: Duration::from_millis(5),
			..Default::default()
		},
	)
	.unwrap();
	pipeline.launch();
	let store_id = NodeId::new("data-store");
	wait_for(Duration::from_secs(2), || {
		pipeline.node(&store_id).unwrap().status() == Status::Running
	});
	assert_eq!(
		resource.read(|idx| idx.count(EntryState::Current)).unwrap(),
		1
	);
	pipeline.terminate();
}
