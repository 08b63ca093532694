use fxhash::FxHashSet;
use parking_lot::RwLock;

use crate::key::{CacheKey, ScopeKey, ScopeTable};

#[derive(Default)]
struct Graph {
	/// consumer -> producers it read during its last computation
	based_on: ScopeTable<FxHashSet<CacheKey>>,
	/// producer -> consumers to evict when it changes
	used_by: ScopeTable<FxHashSet<CacheKey>>,
}

/// Forward and inverse dependency maps between cache keys.
#[derive(Default)]
pub(crate) struct Dependencies {
	graph: RwLock<Graph>,
}

impl Dependencies {
	/// Replaces the producers of `consumer` with `next`, unlinking the
	/// consumer from producers it no longer reads.
	pub fn swap(&self, consumer: &CacheKey, next: FxHashSet<CacheKey>) {
		let mut guard = self.graph.write();
		let graph = &mut *guard;

		for producer in &next {
			graph
				.used_by
				.entry_or_default(producer)
				.insert(consumer.clone());
		}

		let prev = graph.based_on.insert(consumer, next).unwrap_or_default();
		let Some(next) = graph.based_on.get(consumer) else {
			return;
		};

		// Diff the keys
		for stale in prev.iter().filter(|key| !next.contains(key)) {
			unlink(&mut graph.used_by, stale, consumer);
		}
	}

	pub fn dependencies_of(&self, consumer: &CacheKey) -> Vec<CacheKey> {
		let graph = self.graph.read();
		graph
			.based_on
			.get(consumer)
			.map(|producers| producers.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// One level of consumers that must be evicted if `producer` changes.
	pub fn invalidations_of(&self, producer: &CacheKey) -> Vec<CacheKey> {
		let graph = self.graph.read();
		graph
			.used_by
			.get(producer)
			.map(|consumers| consumers.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Forgets every edge touching `scope`, on both sides.
	pub fn drop_scope(&self, scope: ScopeKey) {
		let mut guard = self.graph.write();
		let graph = &mut *guard;

		if let Some(forward) = graph.based_on.remove_scope(scope) {
			for (property, producers) in forward {
				let consumer = CacheKey::new(scope, property);
				for producer in &producers {
					unlink(&mut graph.used_by, producer, &consumer);
				}
			}
		}

		if let Some(inverse) = graph.used_by.remove_scope(scope) {
			for (property, consumers) in inverse {
				let producer = CacheKey::new(scope, property);
				for consumer in &consumers {
					unlink(&mut graph.based_on, consumer, &producer);
				}
			}
		}
	}

	pub fn edge_count(&self) -> usize {
		let graph = self.graph.read();
		graph.based_on.values().map(|producers| producers.len()).sum()
	}
}

fn unlink(table: &mut ScopeTable<FxHashSet<CacheKey>>, from: &CacheKey, member: &CacheKey) {
	let now_empty = match table.get_mut(from) {
		Some(members) => {
			members.remove(member);
			members.is_empty()
		}
		None => false,
	};
	if now_empty {
		table.remove(from);
	}
}
