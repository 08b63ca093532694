use std::future::Future;
use std::sync::Arc;

use fxhash::FxHashSet;
use parking_lot::Mutex;

use crate::key::CacheKey;

tokio::task_local! {
	/// Innermost evaluation of the current call chain, carried across
	/// `.await` points.
	static CURRENT: Option<Arc<Evaluation>>;
}

/// Reads observed by one in-progress computation.
pub(crate) struct Evaluation {
	consumer: Option<CacheKey>,
	parent: Option<Arc<Evaluation>>,
	depth: usize,
	collects_nested: bool,
	inner: Mutex<EvaluationInner>,
}

struct EvaluationInner {
	based_on: FxHashSet<CacheKey>,
}

impl Evaluation {
	/// A frame for the computation of `consumer`, nested in `parent`.
	pub(crate) fn new(consumer: CacheKey, parent: Option<Arc<Evaluation>>) -> Arc<Self> {
		Self::create(Some(consumer), parent, false)
	}

	/// A frame with no consumer that also collects every read made by
	/// computations nested below it.
	pub(crate) fn root() -> Arc<Self> {
		Self::create(None, current(), true)
	}

	fn create(
		consumer: Option<CacheKey>,
		parent: Option<Arc<Evaluation>>,
		collects_nested: bool,
	) -> Arc<Self> {
		let depth = parent.as_ref().map_or(0, |parent| parent.depth + 1);
		Arc::new(Evaluation {
			consumer,
			parent,
			depth,
			collects_nested,
			inner: Mutex::new(EvaluationInner {
				based_on: FxHashSet::default(),
			}),
		})
	}

	pub(crate) fn depth(&self) -> usize {
		self.depth
	}

	pub(crate) fn based_on(&self, key: &CacheKey) {
		self.inner.lock().based_on.insert(key.clone());

		let mut ancestor = self.parent.as_deref();
		while let Some(evaluation) = ancestor {
			if evaluation.collects_nested {
				evaluation.inner.lock().based_on.insert(key.clone());
			}
			ancestor = evaluation.parent.as_deref();
		}
	}

	/// Whether `key` is being computed anywhere up this call chain.
	pub(crate) fn is_evaluating(&self, key: &CacheKey) -> bool {
		let mut frame = Some(self);
		while let Some(evaluation) = frame {
			if evaluation.consumer.as_ref() == Some(key) {
				return true;
			}
			frame = evaluation.parent.as_deref();
		}
		false
	}

	pub(crate) fn take(&self) -> FxHashSet<CacheKey> {
		std::mem::take(&mut self.inner.lock().based_on)
	}
}

pub(crate) fn current() -> Option<Arc<Evaluation>> {
	CURRENT.try_with(|current| current.clone()).ok().flatten()
}

/// Records a read of `key` into the innermost frame, if any.
pub(crate) fn record(key: &CacheKey) {
	if let Some(evaluation) = current() {
		evaluation.based_on(key);
	}
}

/// Runs `body` with `evaluation` as the innermost frame. The previous frame
/// is restored when `body` returns or unwinds.
pub(crate) fn with_recording<R>(evaluation: Arc<Evaluation>, body: impl FnOnce() -> R) -> R {
	CURRENT.sync_scope(Some(evaluation), body)
}

/// Like [`with_recording`], for a future that may suspend.
pub(crate) fn recording<F: Future>(evaluation: Arc<Evaluation>, future: F) -> impl Future<Output = F::Output> {
	CURRENT.scope(Some(evaluation), future)
}

/// Runs `body` without recording any of its reads.
pub fn untracked<R>(body: impl FnOnce() -> R) -> R {
	CURRENT.sync_scope(None, body)
}
