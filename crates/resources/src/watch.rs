//! A polling directory observer.
//!
//! Takes a snapshot of every file's modification time on an interval
//! and fires a callback when the snapshot changes. Resource nodes
//! hand it their trigger handle so a filesystem change wakes the
//! node.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	thread::JoinHandle,
	time::{Duration, SystemTime},
};
use tracing::debug;
use walkdir::WalkDir;

/// Mtime of every file under `root`, excluding `ignored` paths.
fn snapshot(root: &Path, ignored: &[PathBuf]) -> HashMap<PathBuf, SystemTime> {
	let mut out = HashMap::new();
	for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
		if !entry.file_type().is_file() {
			continue;
		}
		if ignored.iter().any(|p| p == entry.path()) {
			continue;
		}
		if let Ok(meta) = entry.metadata() {
			if let Ok(mtime) = meta.modified() {
				out.insert(entry.path().to_path_buf(), mtime);
			}
		}
	}
	out
}

/// Watches one directory tree and fires a callback on change.
///
/// The observer owns a background thread; dropping it (or calling
/// [`stop`](Self::stop)) joins the thread.
pub struct DirObserver {
	stop: Arc<AtomicBool>,
	join: Option<JoinHandle<()>>,
}

impl DirObserver {
	/// Watch `root`, polling every `interval`. Paths in `ignored` are
	/// invisible to the observer, so the owning node can keep its own
	/// index file inside the tree without waking itself.
	pub fn spawn(
		root: PathBuf,
		interval: Duration,
		ignored: Vec<PathBuf>,
		on_change: impl Fn() + Send + 'static,
	) -> Self {
		let stop = Arc::new(AtomicBool::new(false));
		let stop2 = stop.clone();

		// Snapshot before the thread starts: anything already present
		// when the observer is built is not a change.
		let mut prev = snapshot(&root, &ignored);

		let join = std::thread::Builder::new()
			.name(format!("watch: {}", root.display()))
			.spawn(move || {
				while !stop2.load(Ordering::SeqCst) {
					std::thread::sleep(interval);
					let next = snapshot(&root, &ignored);
					if next != prev {
						debug!(
							source = "watch",
							summary = "Directory changed",
							root = %root.display(),
						);
						prev = next;
						on_change();
					}
				}
			})
			// Spawning fails only when the OS is out of threads.
			.unwrap();

		Self {
			stop,
			join: Some(join),
		}
	}

	/// Stop watching and join the observer thread.
	pub fn stop(&mut self) {
		self.stop.store(true, Ordering::SeqCst);
		if let Some(join) = self.join.take() {
			let _ = join.join();
		}
	}
}

impl Drop for DirObserver {
	fn drop(&mut self) {
		self.stop();
	}
}
