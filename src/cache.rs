use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::error::Result;
use crate::key::{CacheKey, ScopeKey, ScopeTable};
use crate::property::PropertyHandle;
use crate::value::Value;

type KeyLock = Arc<Mutex<()>>;

/// Memoized property values with "compute once, many readers" semantics.
///
/// A write spans the replaced entry and its whole cascade. `revision` moves
/// when a write starts and again when it ends, and `writing` counts writes
/// in flight. A computation that started during a write, or saw the
/// revision move before it finished, may have read inputs from both sides
/// of that write, so its result is handed to its caller but never memoized.
pub(crate) struct Cache {
	entries: RwLock<ScopeTable<Value>>,
	locks: Mutex<FxHashMap<CacheKey, KeyLock>>,
	revision: AtomicU64,
	writing: AtomicUsize,
}

impl Default for Cache {
	fn default() -> Self {
		Cache {
			entries: RwLock::new(ScopeTable::default()),
			locks: Mutex::new(FxHashMap::default()),
			revision: AtomicU64::new(0),
			writing: AtomicUsize::new(0),
		}
	}
}

impl Cache {
	pub fn get(&self, key: &CacheKey) -> Option<Value> {
		self.entries.read().get(key).cloned()
	}

	pub fn revision(&self) -> u64 {
		self.revision.load(Ordering::SeqCst)
	}

	/// Marks a write in flight until the returned guard drops.
	pub fn begin_write(&self) -> Write<'_> {
		self.writing.fetch_add(1, Ordering::SeqCst);
		self.revision.fetch_add(1, Ordering::SeqCst);
		Write { cache: self }
	}

	/// The revision a computation starting now may memoize under, or `None`
	/// while a write is in flight.
	fn snapshot(&self) -> Option<u64> {
		let revision = self.revision();
		if self.writing.load(Ordering::SeqCst) > 0 {
			return None;
		}
		Some(revision)
	}

	pub fn get_or_compute(
		&self,
		key: &CacheKey,
		compute: impl FnOnce() -> Result<Value>,
	) -> Result<Value> {
		if let Some(value) = self.get(key) {
			return Ok(value);
		}

		let reclaim = Reclaim {
			locks: &self.locks,
			key,
			lock: self.lock_for(key),
		};
		let _guard = reclaim.lock.lock();

		// Another caller may have finished while we waited.
		if let Some(value) = self.get(key) {
			return Ok(value);
		}

		let snapshot = self.snapshot();
		let value = compute()?;
		self.store(key, value.clone(), snapshot);
		Ok(value)
	}

	/// Replaces the entry with a freshly written value. Returns what was
	/// there before. Writes that others may observe hold a [`Write`] across
	/// this and the cascade that follows.
	pub fn replace(&self, key: &CacheKey, value: Value) -> Option<Value> {
		self.entries.write().insert(key, value)
	}

	pub fn evict(&self, key: &CacheKey) -> Option<Value> {
		self.entries.write().remove(key)
	}

	pub fn remove_scope(&self, scope: ScopeKey) -> Option<FxHashMap<PropertyHandle, Value>> {
		self.entries.write().remove_scope(scope)
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Keys with a computation in progress or waiters queued on one.
	pub fn computing(&self) -> usize {
		self.locks.lock().len()
	}

	fn store(&self, key: &CacheKey, value: Value, snapshot: Option<u64>) -> bool {
		let mut entries = self.entries.write();
		if snapshot != Some(self.revision()) {
			trace!(%key, "computed across a write, not memoized");
			return false;
		}
		let previous = entries.insert(key, value);
		drop(entries);
		drop(previous);
		true
	}

	fn lock_for(&self, key: &CacheKey) -> KeyLock {
		self.locks.lock().entry(key.clone()).or_default().clone()
	}
}

pub(crate) struct Write<'a> {
	cache: &'a Cache,
}

impl Drop for Write<'_> {
	fn drop(&mut self) {
		self.cache.revision.fetch_add(1, Ordering::SeqCst);
		self.cache.writing.fetch_sub(1, Ordering::SeqCst);
	}
}

/// Removes the per-key lock once nobody else is waiting on it. Runs on the
/// error and unwind paths too.
struct Reclaim<'a> {
	locks: &'a Mutex<FxHashMap<CacheKey, KeyLock>>,
	key: &'a CacheKey,
	lock: KeyLock,
}

impl Drop for Reclaim<'_> {
	fn drop(&mut self) {
		let mut locks = self.locks.lock();
		let unused = locks
			.get(self.key)
			.map_or(false, |current| Arc::ptr_eq(current, &self.lock) && Arc::strong_count(&self.lock) == 2);
		if unused {
			locks.remove(self.key);
		}
	}
}
