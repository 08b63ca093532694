use std::any::Any;
use std::fmt::Display;
use std::sync::{Arc, Weak};

use fxhash::FxHashMap;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::identity::{Identity, IdentityKey};
use crate::key::ScopeKey;
use crate::property::{Property, PropertyHandle};
use crate::scope::{Scope, ScopeBody, ScopeId, ScopeType};
use crate::value::{PropertyValue, Value};

/// Opaque user payload carried alongside a scope. The engine never looks
/// inside.
#[derive(Clone)]
pub struct Storage {
	inner: Arc<dyn Any + Send + Sync>,
}

impl Storage {
	pub fn new<T: Any + Send + Sync>(storage: T) -> Self {
		Storage {
			inner: Arc::new(storage),
		}
	}

	pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
		self.inner.downcast_ref::<T>()
	}

	pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		Arc::downcast::<T>(self.inner.clone()).ok()
	}
}

impl std::fmt::Debug for Storage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("Storage(..)")
	}
}

/// Everything needed to bring a scope instance to life.
pub struct Registration {
	pub(crate) ty: ScopeType,
	pub(crate) identity: Identity,
	pub(crate) storage: Option<Storage>,
	pub(crate) context: Option<Arc<str>>,
	pub(crate) canonical: bool,
	pub(crate) initial: Vec<(PropertyHandle, Value)>,
}

impl Registration {
	pub fn new<K: IdentityKey>(ty: ScopeType, identity: K) -> Self {
		Registration::with_identity(ty, Identity::new(identity))
	}

	pub fn with_identity(ty: ScopeType, identity: Identity) -> Self {
		Registration {
			ty,
			identity,
			storage: None,
			context: None,
			canonical: false,
			initial: Vec::new(),
		}
	}

	pub fn storage<T: Any + Send + Sync>(mut self, storage: T) -> Self {
		self.storage = Some(Storage::new(storage));
		self
	}

	pub fn context(mut self, context: impl Into<Arc<str>>) -> Self {
		self.context = Some(context.into());
		self
	}

	/// Publishes the instance under its (type, identity, context) key.
	pub fn canonical(mut self) -> Self {
		self.canonical = true;
		self
	}

	/// Seeds a stored property before the scope becomes visible.
	pub fn init<T: PropertyValue>(mut self, property: &Property<T>, value: T) -> Self {
		self.initial.push((property.handle().clone(), Value::new(value)));
		self
	}

	pub(crate) fn canonical_key(&self) -> CanonicalKey {
		CanonicalKey {
			ty: self.ty,
			identity: self.identity.clone(),
			context: self.context.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CanonicalKey {
	ty: ScopeType,
	identity: Identity,
	context: Option<Arc<str>>,
}

impl CanonicalKey {
	pub fn new(ty: ScopeType, identity: Identity, context: Option<&str>) -> Self {
		CanonicalKey {
			ty,
			identity,
			context: context.map(Arc::from),
		}
	}
}

impl Display for CanonicalKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}({})", self.ty, self.identity)?;
		if let Some(context) = &self.context {
			write!(f, "@{context}")?;
		}
		Ok(())
	}
}

pub(crate) struct Metadata {
	identity: Identity,
	storage: Option<Storage>,
	context: Option<Arc<str>>,
	canonical: Option<CanonicalKey>,
	id: Option<ScopeId>,
}

impl Metadata {
	pub fn new(registration: &Registration) -> Self {
		Metadata {
			identity: registration.identity.clone(),
			storage: registration.storage.clone(),
			context: registration.context.clone(),
			canonical: registration.canonical.then(|| registration.canonical_key()),
			id: None,
		}
	}
}

struct Entry {
	body: Weak<ScopeBody>,
	meta: Metadata,
}

#[derive(Default)]
struct Indices {
	live: FxHashMap<ScopeKey, Entry>,
	canonical: FxHashMap<CanonicalKey, ScopeKey>,
	by_id: FxHashMap<ScopeId, ScopeKey>,
}

impl Indices {
	fn upgrade(&self, key: ScopeKey) -> Option<Scope> {
		self.live
			.get(&key)
			.and_then(|entry| entry.body.upgrade())
			.map(Scope::from_body)
	}
}

pub(crate) enum Published {
	Inserted,
	Existing(Scope),
}

/// Canonical instance-to-metadata mapping plus the lookup indices derived
/// from it. All indices change under one lock so a concurrent lookup sees
/// an instance either fully registered or fully gone.
///
/// Upgraded handles are always moved out of the lock before they can be
/// dropped: dropping the last handle re-enters the registry.
#[derive(Default)]
pub(crate) struct Registry {
	indices: RwLock<Indices>,
}

impl Registry {
	/// Records `scope`. With `reuse`, a live canonical instance for the same
	/// key is returned instead of failing.
	pub fn publish(&self, scope: &Scope, meta: Metadata, reuse: bool) -> Result<Published> {
		let mut indices = self.indices.write();

		if let Some(canonical) = meta.canonical.clone() {
			let existing = indices
				.canonical
				.get(&canonical)
				.and_then(|&existing| indices.upgrade(existing));
			if let Some(existing) = existing {
				drop(indices);
				drop(meta);
				return if reuse {
					Ok(Published::Existing(existing))
				} else {
					Err(Error::AlreadyRegistered(canonical.to_string()))
				};
			}
			indices.canonical.insert(canonical, scope.key());
		}

		indices.live.insert(
			scope.key(),
			Entry {
				body: scope.downgrade(),
				meta,
			},
		);

		Ok(Published::Inserted)
	}

	pub fn lookup(&self, key: &CanonicalKey) -> Option<Scope> {
		let indices = self.indices.read();
		let scope = *indices.canonical.get(key)?;
		indices.upgrade(scope)
	}

	pub fn lookup_by_id(&self, id: ScopeId) -> Option<Scope> {
		let indices = self.indices.read();
		let scope = *indices.by_id.get(&id)?;
		indices.upgrade(scope)
	}

	pub fn scope(&self, key: ScopeKey) -> Option<Scope> {
		self.indices.read().upgrade(key)
	}

	pub fn contains(&self, key: ScopeKey) -> bool {
		self.indices.read().live.contains_key(&key)
	}

	/// Drops every index entry of `key`. The removed metadata is returned so
	/// its storage is released by the caller, outside of the lock.
	pub fn remove(&self, key: ScopeKey) -> Option<Metadata> {
		let mut indices = self.indices.write();
		let entry = indices.live.remove(&key)?;

		if let Some(canonical) = &entry.meta.canonical {
			if indices.canonical.get(canonical) == Some(&key) {
				indices.canonical.remove(canonical);
			}
		}
		if let Some(id) = entry.meta.id {
			indices.by_id.remove(&id);
		}

		Some(entry.meta)
	}

	pub fn identity_of(&self, key: ScopeKey) -> Option<Identity> {
		let indices = self.indices.read();
		indices.live.get(&key).map(|entry| entry.meta.identity.clone())
	}

	pub fn storage_of(&self, key: ScopeKey) -> Option<Storage> {
		let indices = self.indices.read();
		indices.live.get(&key)?.meta.storage.clone()
	}

	pub fn context_of(&self, key: ScopeKey) -> Option<Arc<str>> {
		let indices = self.indices.read();
		indices.live.get(&key)?.meta.context.clone()
	}

	/// Returns the public id of `key`, allocating it on first request.
	pub fn id_of(&self, key: ScopeKey) -> Option<ScopeId> {
		if let Some(id) = self.indices.read().live.get(&key)?.meta.id {
			return Some(id);
		}

		let mut indices = self.indices.write();
		let entry = indices.live.get_mut(&key)?;
		let id = *entry.meta.id.get_or_insert_with(ScopeId::new);
		indices.by_id.insert(id, key);
		Some(id)
	}

	pub fn len(&self) -> usize {
		self.indices.read().live.len()
	}
}
