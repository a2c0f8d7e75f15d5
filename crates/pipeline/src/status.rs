//! Node lifecycle state

use std::sync::{Condvar, Mutex};

/// The lifecycle state of a node worker at a point in time.
///
/// A worker moves monotonically through
/// `Off → Init → Running → (Paused ↔ Running)* → Stopping → Exited`.
/// `Error` is terminal and only entered from `Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
	/// This node's worker has not been started
	Off,

	/// The worker is running its setup hook
	Init,

	/// The worker is cycling through its main loop
	Running,

	/// The worker is parked until resumed or stopped
	Paused,

	/// A stop was requested; the worker exits at its next scheduling point
	Stopping,

	/// The worker has exited cleanly
	Exited,

	/// Setup failed. The worker never emitted a message.
	Error,
}

impl Status {
	/// Is this [`Status::Running`]?
	pub fn is_running(&self) -> bool {
		matches!(self, Self::Running)
	}

	/// Is this [`Status::Paused`]?
	pub fn is_paused(&self) -> bool {
		matches!(self, Self::Paused)
	}

	/// Is this [`Status::Exited`] or [`Status::Error`]?
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Exited | Self::Error)
	}
}

/// A node's shared status field.
///
/// One of these is shared between a node's worker thread and every
/// handle to that node. The condvar wakes workers parked at the
/// pause gate, so `resume()` and `stop()` take effect immediately
/// instead of on the next poll.
#[derive(Debug)]
pub struct StatusCell {
	state: Mutex<Status>,
	changed: Condvar,
}

impl StatusCell {
	pub(crate) fn new() -> Self {
		Self {
			state: Mutex::new(Status::Off),
			changed: Condvar::new(),
		}
	}

	/// The current status.
	pub fn get(&self) -> Status {
		*self.state.lock().unwrap()
	}

	pub(crate) fn set(&self, value: Status) {
		let mut state = self.state.lock().unwrap();
		*state = value;
		self.changed.notify_all();
	}

	/// Request a pause. Only a `Running` worker can be paused.
	pub fn pause(&self) {
		let mut state = self.state.lock().unwrap();
		if *state == Status::Running {
			*state = Status::Paused;
			self.changed.notify_all();
		}
	}

	/// Resume a paused worker.
	pub fn resume(&self) {
		let mut state = self.state.lock().unwrap();
		if *state == Status::Paused {
			*state = Status::Running;
			self.changed.notify_all();
		}
	}

	/// Request a cooperative stop.
	///
	/// The worker observes this at its next scheduling point. A stop
	/// issued before the worker leaves `Off` or `Init` is honored:
	/// the worker exits without ever entering `Running`.
	pub fn stop(&self) {
		let mut state = self.state.lock().unwrap();
		match *state {
			Status::Off | Status::Init | Status::Running | Status::Paused => {
				*state = Status::Stopping;
				self.changed.notify_all();
			}
			_ => {}
		}
	}

	/// Block while paused. Returns when the status is anything else.
	///
	/// This is the pause gate: the worker calls it before entering
	/// each hook, so a pause lands between hooks, never inside one.
	pub(crate) fn pause_gate(&self) {
		let mut state = self.state.lock().unwrap();
		while *state == Status::Paused {
			state = self.changed.wait(state).unwrap();
		}
	}

	/// `Off → Init`, unless a stop already arrived.
	/// Returns `false` if the worker should exit instead of setting up.
	pub(crate) fn begin_init(&self) -> bool {
		let mut state = self.state.lock().unwrap();
		if *state == Status::Off {
			*state = Status::Init;
			self.changed.notify_all();
			return true;
		}
		false
	}

	/// `Init → Running`, unless a stop arrived during setup.
	/// Returns `false` if the worker should exit instead of running.
	pub(crate) fn finish_init(&self) -> bool {
		let mut state = self.state.lock().unwrap();
		if *state == Status::Init {
			*state = Status::Running;
			self.changed.notify_all();
			return true;
		}
		false
	}
}
