//! The readers/writer protocol resource nodes layer on top of the
//! node runtime.
//!
//! A [`SharedResource`] lets many downstream workers observe a
//! consistent snapshot of a payload while the owning node defers
//! mutation until every declared reader has been through. Mutation
//! waits on an expected-reader latch: it proceeds only once the
//! expected number of readers have arrived *and* departed, so a
//! single fast reader entering and leaving repeatedly cannot drain
//! the latch before its siblings arrive.

use std::{
	error::Error,
	fmt::Display,
	sync::{Condvar, Mutex, RwLock},
	time::{Duration, Instant},
};

/// An error from the shared-resource protocol.
#[derive(Debug)]
pub enum ResourceError {
	/// The resource was closed while we were waiting on it.
	Closed,

	/// The expected readers did not drain within the allowed wait.
	DrainTimeout {
		/// How long we waited
		waited: Duration,
	},
}

impl Error for ResourceError {}

impl Display for ResourceError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Closed => write!(f, "resource is closed"),
			Self::DrainTimeout { waited } => {
				write!(f, "readers did not drain within {waited:?}")
			}
		}
	}
}

#[derive(Debug)]
struct ReaderLatch {
	/// Readers inside the externally-accessible section right now
	active: usize,

	/// Readers that have entered since the latch was last re-armed
	arrived: usize,

	/// How many arrivals a mutation must wait for
	expected: usize,

	/// Set once setup has run; readers wait for it
	ready: bool,

	/// Set by [`SharedResource::close`]; wakes and fails all waiters
	closed: bool,
}

/// A payload shared between a resource node and its reader successors.
///
/// Method categories map onto the protocol:
/// - [`read`](Self::read) is the externally-accessible reader section,
/// - [`access`](Self::access) is the owner's exclusive accessor,
/// - [`setup`](Self::setup) is the accessor that makes the payload
///   observable in the first place,
/// - [`update`](Self::update) / [`update_within`](Self::update_within)
///   are the await-drained mutators.
///
/// A mutation is never concurrent with any reader of the same
/// resource.
#[derive(Debug)]
pub struct SharedResource<T> {
	payload: RwLock<T>,
	latch: Mutex<ReaderLatch>,
	drained: Condvar,
}

impl<T> SharedResource<T> {
	/// Wrap a payload. It is not observable until [`setup`](Self::setup)
	/// has run.
	pub fn new(payload: T) -> Self {
		Self {
			payload: RwLock::new(payload),
			latch: Mutex::new(ReaderLatch {
				active: 0,
				arrived: 0,
				expected: 0,
				ready: false,
				closed: false,
			}),
			drained: Condvar::new(),
		}
	}

	/// Declare how many reader arrivals a mutation must wait for.
	///
	/// Resource behaviors set this to their successor count at setup.
	pub fn set_expected_readers(&self, n: usize) {
		let mut latch = self.latch.lock().unwrap();
		latch.expected = n;
		self.drained.notify_all();
	}

	/// How many reader arrivals a mutation waits for.
	pub fn expected_readers(&self) -> usize {
		self.latch.lock().unwrap().expected
	}

	/// Has [`setup`](Self::setup) run?
	pub fn is_ready(&self) -> bool {
		self.latch.lock().unwrap().ready
	}

	/// Run the setup accessor: exclusive access to the payload, after
	/// which readers may observe it.
	pub fn setup<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
		let r = {
			let mut payload = self.payload.write().unwrap();
			f(&mut payload)
		};
		let mut latch = self.latch.lock().unwrap();
		latch.ready = true;
		self.drained.notify_all();
		r
	}

	/// The externally-accessible reader section.
	///
	/// Registers this reader with the latch, runs `f` against the
	/// payload, and deregisters. Blocks until setup has finished.
	pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ResourceError> {
		{
			let mut latch = self.latch.lock().unwrap();
			loop {
				if latch.closed {
					return Err(ResourceError::Closed);
				}
				if latch.ready {
					break;
				}
				latch = self.drained.wait(latch).unwrap();
			}
			latch.active += 1;
			latch.arrived += 1;
		}

		let r = {
			let payload = self.payload.read().unwrap();
			f(&payload)
		};

		let mut latch = self.latch.lock().unwrap();
		latch.active -= 1;
		if latch.active == 0 && latch.arrived >= latch.expected {
			self.drained.notify_all();
		}
		Ok(r)
	}

	/// The owner's exclusive accessor. Does not touch the latch.
	pub fn access<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, ResourceError> {
		{
			let mut latch = self.latch.lock().unwrap();
			loop {
				if latch.closed {
					return Err(ResourceError::Closed);
				}
				if latch.ready {
					break;
				}
				latch = self.drained.wait(latch).unwrap();
			}
		}
		let mut payload = self.payload.write().unwrap();
		Ok(f(&mut payload))
	}

	/// Mutate the payload once every expected reader has been through.
	///
	/// Blocks indefinitely. Prefer [`update_within`](Self::update_within)
	/// from worker hooks so a stopping pipeline stays live.
	pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, ResourceError> {
		self.update_inner(None, f)
	}

	/// Like [`update`](Self::update), but gives up with
	/// [`ResourceError::DrainTimeout`] if the latch does not drain
	/// within `timeout`.
	pub fn update_within<R>(
		&self,
		timeout: Duration,
		f: impl FnOnce(&mut T) -> R,
	) -> Result<R, ResourceError> {
		self.update_inner(Some(timeout), f)
	}

	fn update_inner<R>(
		&self,
		timeout: Option<Duration>,
		f: impl FnOnce(&mut T) -> R,
	) -> Result<R, ResourceError> {
		let start = Instant::now();
		{
			let mut latch = self.latch.lock().unwrap();
			loop {
				if latch.closed {
					return Err(ResourceError::Closed);
				}
				if latch.ready && latch.active == 0 && latch.arrived >= latch.expected {
					// Re-arm for the next round before mutating.
					latch.arrived = 0;
					break;
				}
				match timeout {
					None => latch = self.drained.wait(latch).unwrap(),
					Some(limit) => {
						let waited = start.elapsed();
						if waited >= limit {
							return Err(ResourceError::DrainTimeout { waited });
						}
						let (l, _) = self
							.drained
							.wait_timeout(latch, limit - waited)
							.unwrap();
						latch = l;
					}
				}
			}
		}

		let mut payload = self.payload.write().unwrap();
		Ok(f(&mut payload))
	}

	/// Close the resource: every current and future waiter fails with
	/// [`ResourceError::Closed`].
	pub fn close(&self) {
		let mut latch = self.latch.lock().unwrap();
		latch.closed = true;
		self.drained.notify_all();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;

	#[test]
	fn readers_wait_for_setup() {
		let res = Arc::new(SharedResource::new(0u32));
		let r2 = res.clone();
		let reader = thread::spawn(move || r2.read(|v| *v).unwrap());

		thread::sleep(Duration::from_millis(30));
		res.setup(|v| *v = 7);
		assert_eq!(reader.join().unwrap(), 7);
	}

	#[test]
	fn update_waits_for_expected_readers() {
		let res = Arc::new(SharedResource::new(Vec::<u32>::new()));
		res.setup(|_| {});
		res.set_expected_readers(2);

		let mut readers = Vec::new();
		for _ in 0..2 {
			let r = res.clone();
			readers.push(thread::spawn(move || {
				// Timestamp taken inside the section, before the
				// latch decrement.
				r.read(|_| {
					thread::sleep(Duration::from_millis(80));
					Instant::now()
				})
				.unwrap()
			}));
		}

		// Give both readers time to arrive before mutating.
		thread::sleep(Duration::from_millis(20));
		let mutated_at = res
			.update(|v| {
				v.push(1);
				Instant::now()
			})
			.unwrap();

		for r in readers {
			let done_at = r.join().unwrap();
			assert!(mutated_at >= done_at);
		}
	}

	#[test]
	fn update_waits_for_arrivals_not_just_zero_crossings() {
		let res = Arc::new(SharedResource::new(0u32));
		res.setup(|_| {});
		res.set_expected_readers(2);

		// One reader enters and leaves; the latch must stay armed.
		res.read(|_| {}).unwrap();

		let err = res.update_within(Duration::from_millis(50), |_| {});
		assert!(matches!(err, Err(ResourceError::DrainTimeout { .. })));

		// The second arrival drains it.
		res.read(|_| {}).unwrap();
		assert!(res.update(|v| *v += 1).is_ok());
	}

	#[test]
	fn update_rearms_the_latch() {
		let res = SharedResource::new(0u32);
		res.setup(|_| {});
		res.set_expected_readers(1);

		res.read(|_| {}).unwrap();
		res.update(|v| *v += 1).unwrap();

		// Arrivals were consumed; the next update must wait again.
		let err = res.update_within(Duration::from_millis(50), |_| {});
		assert!(matches!(err, Err(ResourceError::DrainTimeout { .. })));
	}

	#[test]
	fn close_releases_waiters() {
		let res = Arc::new(SharedResource::new(0u32));
		res.setup(|_| {});
		res.set_expected_readers(1);

		let r2 = res.clone();
		let waiter = thread::spawn(move || r2.update(|_| {}));

		thread::sleep(Duration::from_millis(30));
		res.close();
		assert!(matches!(waiter.join().unwrap(), Err(ResourceError::Closed)));
		assert!(matches!(res.read(|v| *v), Err(ResourceError::Closed)));
	}
}
