use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

use fxhash::FxHashMap;

use crate::property::PropertyHandle;

static NEXT_SCOPE_KEY: AtomicU64 = AtomicU64::new(1);

/// Internal address of a scope instance inside every engine table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(u64);

impl ScopeKey {
	pub(crate) fn next() -> Self {
		ScopeKey(NEXT_SCOPE_KEY.fetch_add(1, Ordering::Relaxed))
	}
}

impl Display for ScopeKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// The unit of memoization and invalidation: one property on one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
	pub scope: ScopeKey,
	pub property: PropertyHandle,
}

impl CacheKey {
	pub fn new(scope: ScopeKey, property: PropertyHandle) -> Self {
		CacheKey { scope, property }
	}
}

impl Display for CacheKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}{}", self.property, self.scope)
	}
}

/// Two-level map keyed by scope first, so everything belonging to one scope
/// can be dropped in a single removal.
pub(crate) struct ScopeTable<V> {
	scopes: FxHashMap<ScopeKey, FxHashMap<PropertyHandle, V>>,
}

impl<V> Default for ScopeTable<V> {
	fn default() -> Self {
		ScopeTable {
			scopes: FxHashMap::default(),
		}
	}
}

impl<V> ScopeTable<V> {
	pub fn get(&self, key: &CacheKey) -> Option<&V> {
		self.scopes.get(&key.scope)?.get(&key.property)
	}

	pub fn get_mut(&mut self, key: &CacheKey) -> Option<&mut V> {
		self.scopes.get_mut(&key.scope)?.get_mut(&key.property)
	}

	pub fn insert(&mut self, key: &CacheKey, value: V) -> Option<V> {
		self.scopes
			.entry(key.scope)
			.or_default()
			.insert(key.property.clone(), value)
	}

	/// Inserts only when the key is vacant. A rejected value is handed back
	/// so the caller can drop it outside of any lock.
	pub fn insert_if_absent(&mut self, key: &CacheKey, value: V) -> Option<V> {
		let properties = self.scopes.entry(key.scope).or_default();
		if properties.contains_key(&key.property) {
			return Some(value);
		}
		properties.insert(key.property.clone(), value);
		None
	}

	pub fn entry_or_default(&mut self, key: &CacheKey) -> &mut V
	where
		V: Default,
	{
		self.scopes
			.entry(key.scope)
			.or_default()
			.entry(key.property.clone())
			.or_default()
	}

	pub fn remove(&mut self, key: &CacheKey) -> Option<V> {
		let properties = self.scopes.get_mut(&key.scope)?;
		let removed = properties.remove(&key.property);
		if properties.is_empty() {
			self.scopes.remove(&key.scope);
		}
		removed
	}

	pub fn remove_scope(&mut self, scope: ScopeKey) -> Option<FxHashMap<PropertyHandle, V>> {
		self.scopes.remove(&scope)
	}

	pub fn scope(&self, scope: ScopeKey) -> Option<&FxHashMap<PropertyHandle, V>> {
		self.scopes.get(&scope)
	}

	pub fn len(&self) -> usize {
		self.scopes.values().map(|properties| properties.len()).sum()
	}

	pub fn values(&self) -> impl Iterator<Item = &V> {
		self.scopes.values().flat_map(|properties| properties.values())
	}
}
