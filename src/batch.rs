use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::events::{Events, Notification};

#[derive(Default)]
struct BatchState {
	depth: usize,
	queued: SmallVec<[Notification; 8]>,
}

/// Defers notifications while at least one batch is open on the engine.
#[derive(Default)]
pub(crate) struct Batch {
	state: Mutex<BatchState>,
}

impl Batch {
	pub fn in_batch(&self) -> bool {
		self.state.lock().depth > 0
	}

	/// Queues `notification` if a batch is open, otherwise hands it back.
	pub fn defer(&self, notification: Notification) -> Option<Notification> {
		let mut state = self.state.lock();
		if state.depth == 0 {
			return Some(notification);
		}
		state.queued.push(notification);
		None
	}

	fn start(&self) {
		self.state.lock().depth += 1;
	}

	/// Closes one level. Closing the outermost level yields the queue.
	fn stop(&self) -> Option<Vec<Notification>> {
		let mut state = self.state.lock();
		state.depth -= 1;
		if state.depth > 0 {
			return None;
		}
		Some(std::mem::take(&mut state.queued).into_vec())
	}
}

/// Runs `func` with notifications deferred until the outermost batch ends.
pub(crate) fn batch<R>(events: &Events, func: impl FnOnce() -> R) -> R {
	struct Guard<'a> {
		events: &'a Events,
	}

	impl Drop for Guard<'_> {
		fn drop(&mut self) {
			let Some(queued) = self.events.batch.stop() else {
				return;
			};
			if std::thread::panicking() {
				tracing::debug!(dropped = queued.len(), "batch unwound, notifications discarded");
				return;
			}
			self.events.flush(queued);
		}
	}

	events.batch.start();
	let _guard = Guard { events };
	func()
}
