use std::sync::Arc;

use fxhash::FxHashSet;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::cache::Cache;
use crate::config::Config;
use crate::dependencies::Dependencies;
use crate::dispatch::{self, Access};
use crate::error::{Error, Result};
use crate::evaluation::{self, Evaluation};
use crate::events::{
	Events, Notification, PropertyChanged, ScopeInvalidated, ScopeRegistered, Subscription,
};
use crate::identity::Identity;
use crate::key::{CacheKey, ScopeKey, ScopeTable};
use crate::property::{PropertyHandle, PropertyKind};
use crate::registry::{CanonicalKey, Metadata, Published, Registration, Registry, Storage};
use crate::scope::{Scope, ScopeId, ScopeType};
use crate::value::Value;

/// One edge of a property's last computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
	pub scope: Scope,
	pub property: PropertyHandle,
}

/// Point-in-time sizes of the engine's tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
	pub scopes: usize,
	pub cached: usize,
	pub edges: usize,
	pub pending: usize,
	/// Keys with a computation in flight.
	pub computing: usize,
}

/// The reactive property engine.
///
/// Cloning is cheap and every clone refers to the same tables.
#[derive(Clone, Default)]
pub struct Engine {
	inner: Arc<EngineInner>,
}

#[derive(Default)]
struct EngineInner {
	config: Config,
	registry: Registry,
	cache: Cache,
	dependencies: Dependencies,
	/// Pre-invalidation values waiting for `refresh` to diff against.
	pending: Mutex<ScopeTable<Value>>,
	/// Cache revision at which each key was last invalidated.
	stamps: Mutex<ScopeTable<u64>>,
	events: Events,
}

impl Engine {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_config(config: Config) -> Self {
		Engine {
			inner: Arc::new(EngineInner {
				config,
				..Default::default()
			}),
		}
	}

	pub fn config(&self) -> &Config {
		&self.inner.config
	}

	pub fn register(&self, registration: Registration) -> Result<Scope> {
		self.publish(registration, false)
	}

	/// Returns the live canonical scope for the registration's key, or
	/// registers a new canonical one.
	pub fn get_or_register(&self, registration: Registration) -> Result<Scope> {
		self.publish(registration.canonical(), true)
	}

	fn publish(&self, registration: Registration, reuse: bool) -> Result<Scope> {
		for (property, value) in &registration.initial {
			let def = property.def();
			if property.is_computed() {
				return Err(Error::ReadOnly {
					scope: registration.canonical_key().to_string(),
					property: property.to_string(),
				});
			}
			def.check_type(value)?;
			def.validate(value)?;
		}

		let scope = Scope::create(self.clone(), registration.ty);
		let meta = Metadata::new(&registration);

		// Seed before publishing so nobody observes the defaults.
		for (property, value) in registration.initial {
			let key = CacheKey::new(scope.key(), property);
			drop(self.inner.cache.replace(&key, value));
		}

		match self.inner.registry.publish(&scope, meta, reuse)? {
			Published::Existing(existing) => {
				trace!(scope = %existing, "reusing canonical scope");
				Ok(existing)
			}
			Published::Inserted => {
				debug!(label = %self.inner.config.label, scope = %scope, "registered");
				self.inner
					.events
					.emit(Notification::Registered(ScopeRegistered {
						scope: scope.clone(),
					}));
				Ok(scope)
			}
		}
	}

	pub fn lookup(&self, ty: ScopeType, identity: &Identity, context: Option<&str>) -> Option<Scope> {
		self.inner
			.registry
			.lookup(&CanonicalKey::new(ty, identity.clone(), context))
	}

	pub fn lookup_by_id(&self, id: ScopeId) -> Option<Scope> {
		self.inner.registry.lookup_by_id(id)
	}

	/// Removes `scope` from every index and drops everything the engine
	/// remembers about it. Calling it again does nothing.
	pub fn dispose(&self, scope: &Scope) {
		if scope.mark_disposed() {
			debug!(label = %self.inner.config.label, %scope, "disposed");
		}
		self.release(scope.key());
	}

	pub(crate) fn release(&self, key: ScopeKey) {
		let meta = self.inner.registry.remove(key);
		let cached = self.inner.cache.remove_scope(key);
		self.inner.dependencies.drop_scope(key);
		let pending = self.inner.pending.lock().remove_scope(key);
		self.inner.stamps.lock().remove_scope(key);

		if meta.is_some() {
			trace!(scope = %key, "released");
		}

		drop(meta);
		drop(cached);
		drop(pending);
	}

	pub fn id_of(&self, scope: &Scope) -> Option<ScopeId> {
		self.inner.registry.id_of(scope.key())
	}

	pub fn identity_of(&self, scope: &Scope) -> Option<Identity> {
		self.inner.registry.identity_of(scope.key())
	}

	pub fn storage_of(&self, scope: &Scope) -> Option<Storage> {
		self.inner.registry.storage_of(scope.key())
	}

	pub fn context_of(&self, scope: &Scope) -> Option<Arc<str>> {
		self.inner.registry.context_of(scope.key())
	}

	/// Reads `property` on `scope`, computing and memoizing it on a miss.
	///
	/// The read is recorded as a dependency of whatever computation is in
	/// progress on this call chain.
	pub fn get(&self, scope: &Scope, property: &PropertyHandle) -> Result<Value> {
		if scope.is_disposed() {
			return Err(Error::Disposed(scope.to_string()));
		}

		let key = CacheKey::new(scope.key(), property.clone());
		let parent = evaluation::current();
		if parent.as_ref().map_or(false, |parent| parent.is_evaluating(&key)) {
			return Err(Error::Cycle {
				scope: scope.to_string(),
				member: property.to_string(),
			});
		}

		if let Some(value) = self.inner.cache.get(&key) {
			evaluation::record(&key);
			return Ok(value);
		}

		if let Some(parent) = &parent {
			if parent.depth() + 1 >= self.inner.config.max_depth {
				return Err(Error::DepthExceeded {
					limit: self.inner.config.max_depth,
					member: property.to_string(),
				});
			}
		}
		evaluation::record(&key);

		self.inner.cache.get_or_compute(&key, || {
			let evaluation = Evaluation::new(key.clone(), parent);
			trace!(label = %self.inner.config.label, %key, "compute: start");

			let result = evaluation::with_recording(evaluation.clone(), || {
				self.compute(scope, property)
			});

			match result {
				Ok(value) => {
					let based_on = evaluation.take();
					trace!(%key, dependencies = based_on.len(), "compute: ok");
					self.inner.dependencies.swap(&key, based_on);
					Ok(value)
				}
				Err(error) => {
					debug!(%key, %error, "compute: err");
					Err(error)
				}
			}
		})
	}

	fn compute(&self, scope: &Scope, property: &PropertyHandle) -> Result<Value> {
		let def = property.def();
		let value = match def.kind() {
			PropertyKind::Stored(default) => default.clone(),
			PropertyKind::Computed(compute) => {
				let extension = dispatch::resolve(scope, property, Access::Get)?;
				match extension.and_then(|extension| extension.getter()) {
					Some(get) => get(scope)?,
					None => compute(scope)?,
				}
			}
		};
		def.check_type(&value)?;
		Ok(value)
	}

	/// Writes `value` to `property` on `scope`.
	///
	/// Writing the value that is already cached does nothing at all. Other
	/// writes are validated, then either forwarded to the applicable
	/// extension (computed properties) or stored, invalidating everything
	/// that transitively read the old value.
	pub fn set(&self, scope: &Scope, property: &PropertyHandle, value: Value) -> Result<()> {
		if scope.is_disposed() {
			return Err(Error::Disposed(scope.to_string()));
		}

		let def = property.def();
		def.check_type(&value)?;

		let key = CacheKey::new(scope.key(), property.clone());
		if let Some(current) = self.inner.cache.get(&key) {
			if current == value {
				trace!(%key, "write: unchanged");
				return Ok(());
			}
		}

		def.validate(&value)?;

		if let PropertyKind::Computed(_) = def.kind() {
			let extension = dispatch::resolve(scope, property, Access::Set)?;
			let Some(set) = extension.and_then(|extension| extension.setter()) else {
				return Err(Error::ReadOnly {
					scope: scope.to_string(),
					property: property.to_string(),
				});
			};
			trace!(%key, "write: forwarded to extension");
			return set(scope, value);
		}

		let write = self.inner.cache.begin_write();
		let previous = self.inner.cache.replace(&key, value.clone());
		drop(previous);
		let touched = self.invalidate(&key);
		drop(write);
		debug!(
			label = %self.inner.config.label,
			%key,
			scopes = touched.len(),
			"write: invalidated"
		);

		for scope in touched
			.into_iter()
			.filter_map(|touched| self.inner.registry.scope(touched))
		{
			self.inner
				.events
				.emit(Notification::Invalidated(ScopeInvalidated { scope }));
		}

		self.inner.events.emit(Notification::Changed(PropertyChanged {
			scope: scope.clone(),
			property: property.clone(),
			value,
		}));

		Ok(())
	}

	/// Evicts every key that transitively read `origin`, remembering the
	/// evicted values for `refresh`. Each key is visited at most once.
	/// Returns the affected scopes, `origin`'s first.
	fn invalidate(&self, origin: &CacheKey) -> SmallVec<[ScopeKey; 8]> {
		// Stamped with the revision the write ends at, so anything that
		// started before the write finished counts as stale.
		let revision = self.inner.cache.revision() + 1;
		let mut visited = FxHashSet::default();
		let mut touched: SmallVec<[ScopeKey; 8]> = SmallVec::new();
		let mut seen_scopes = FxHashSet::default();

		visited.insert(origin.clone());
		seen_scopes.insert(origin.scope);
		touched.push(origin.scope);
		self.stamp(origin, revision);

		let mut stack = self.inner.dependencies.invalidations_of(origin);
		while let Some(key) = stack.pop() {
			if !visited.insert(key.clone()) {
				continue;
			}

			if let Some(previous) = self.inner.cache.evict(&key) {
				let rejected = self.inner.pending.lock().insert_if_absent(&key, previous);
				drop(rejected);
			}
			self.stamp(&key, revision);

			if seen_scopes.insert(key.scope) {
				touched.push(key.scope);
			}
			stack.extend(self.inner.dependencies.invalidations_of(&key));
		}

		touched
	}

	fn stamp(&self, key: &CacheKey, revision: u64) {
		self.inner.stamps.lock().insert(key, revision);
	}

	/// Recomputes every property of `scope` invalidated since the last
	/// refresh and fires "property changed" for those whose value actually
	/// differs. Returns how many notifications were fired.
	///
	/// Properties that fail to recompute stay pending; the first failure is
	/// returned after all others have been processed.
	pub fn refresh(&self, scope: &Scope) -> Result<usize> {
		let pending = self.inner.pending.lock().remove_scope(scope.key());
		let Some(pending) = pending else {
			return Ok(0);
		};

		let mut fired = 0;
		let mut failure = None;

		for (property, previous) in pending {
			match evaluation::untracked(|| self.get(scope, &property)) {
				Ok(value) => {
					if value != previous {
						fired += 1;
						self.inner.events.emit(Notification::Changed(PropertyChanged {
							scope: scope.clone(),
							property,
							value,
						}));
					}
				}
				Err(error) => {
					warn!(%scope, %property, %error, "refresh: recompute failed");
					if !scope.is_disposed() {
						let key = CacheKey::new(scope.key(), property);
						let rejected = self.inner.pending.lock().insert_if_absent(&key, previous);
						drop(rejected);
					}
					failure.get_or_insert(error);
				}
			}
		}

		trace!(%scope, fired, "refreshed");
		match failure {
			Some(error) => Err(error),
			None => Ok(fired),
		}
	}

	/// Properties of `scope` invalidated and not yet refreshed.
	pub fn pending(&self, scope: &Scope) -> Vec<PropertyHandle> {
		let pending = self.inner.pending.lock();
		pending
			.scope(scope.key())
			.map(|properties| properties.keys().cloned().collect())
			.unwrap_or_default()
	}

	/// What the last computation of `property` on `scope` read.
	pub fn dependencies(&self, scope: &Scope, property: &PropertyHandle) -> Vec<Dependency> {
		let key = CacheKey::new(scope.key(), property.clone());
		self.resolve_keys(self.inner.dependencies.dependencies_of(&key))
	}

	pub(crate) fn resolve_keys(&self, keys: impl IntoIterator<Item = CacheKey>) -> Vec<Dependency> {
		keys.into_iter()
			.filter_map(|key| {
				let scope = self.inner.registry.scope(key.scope)?;
				Some(Dependency {
					scope,
					property: key.property,
				})
			})
			.collect()
	}

	pub(crate) fn revision(&self) -> u64 {
		self.inner.cache.revision()
	}

	/// Whether none of `keys` has been invalidated after `revision` and all of
	/// their scopes are still registered.
	pub(crate) fn unchanged_since<'a>(
		&self,
		keys: impl IntoIterator<Item = &'a CacheKey> + Clone,
		revision: u64,
	) -> bool {
		let live = keys
			.clone()
			.into_iter()
			.all(|key| self.inner.registry.contains(key.scope));
		if !live {
			return false;
		}

		let stamps = self.inner.stamps.lock();
		keys.into_iter()
			.all(|key| stamps.get(key).map_or(true, |stamp| *stamp <= revision))
	}

	/// Runs `func` with every notification deferred until the outermost
	/// batch on this engine returns.
	pub fn batch<R>(&self, func: impl FnOnce() -> R) -> R {
		crate::batch::batch(&self.inner.events, func)
	}

	pub fn in_batch(&self) -> bool {
		self.inner.events.batch.in_batch()
	}

	pub fn on_registered(&self, listener: impl Fn(&ScopeRegistered) + Send + Sync + 'static) -> Subscription {
		self.inner.events.registered.subscribe(listener)
	}

	pub fn on_invalidated(&self, listener: impl Fn(&ScopeInvalidated) + Send + Sync + 'static) -> Subscription {
		self.inner.events.invalidated.subscribe(listener)
	}

	pub fn on_property_changed(
		&self,
		listener: impl Fn(&PropertyChanged) + Send + Sync + 'static,
	) -> Subscription {
		self.inner.events.changed.subscribe(listener)
	}

	pub fn stats(&self) -> Stats {
		Stats {
			scopes: self.inner.registry.len(),
			cached: self.inner.cache.len(),
			edges: self.inner.dependencies.edge_count(),
			pending: self.inner.pending.lock().len(),
			computing: self.inner.cache.computing(),
		}
	}
}

impl std::fmt::Debug for Engine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Engine")
			.field("label", &self.inner.config.label)
			.field("stats", &self.stats())
			.finish()
	}
}
