use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::engine::{Dependency, Engine};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::key::ScopeKey;
use crate::property::{Property, PropertyHandle};
use crate::registry::Storage;
use crate::value::{PropertyValue, Value};

/// Process-unique public id of a scope, handed to out-of-band callers.
pub type ScopeId = snowflake::ProcessUniqueId;

/// The kind of a scope, part of its canonical lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeType {
	name: &'static str,
}

impl ScopeType {
	pub const fn new(name: &'static str) -> Self {
		ScopeType { name }
	}

	pub fn name(&self) -> &'static str {
		self.name
	}
}

impl Display for ScopeType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name)
	}
}

pub(crate) struct ScopeBody {
	key: ScopeKey,
	ty: ScopeType,
	disposed: AtomicBool,
	engine: Engine,
}

impl Drop for ScopeBody {
	fn drop(&mut self) {
		self.engine.release(self.key);
	}
}

/// Handle to a live scope instance.
///
/// Every getter and setter of a scope-backed type delegates here. Dropping
/// the last handle releases the instance as if it had been disposed.
#[derive(Clone)]
pub struct Scope {
	body: Arc<ScopeBody>,
}

impl Scope {
	pub(crate) fn create(engine: Engine, ty: ScopeType) -> Self {
		Scope {
			body: Arc::new(ScopeBody {
				key: ScopeKey::next(),
				ty,
				disposed: AtomicBool::new(false),
				engine,
			}),
		}
	}

	pub(crate) fn from_body(body: Arc<ScopeBody>) -> Self {
		Scope { body }
	}

	pub(crate) fn downgrade(&self) -> Weak<ScopeBody> {
		Arc::downgrade(&self.body)
	}

	pub(crate) fn mark_disposed(&self) -> bool {
		!self.body.disposed.swap(true, Ordering::AcqRel)
	}

	pub fn key(&self) -> ScopeKey {
		self.body.key
	}

	pub fn scope_type(&self) -> ScopeType {
		self.body.ty
	}

	pub fn engine(&self) -> &Engine {
		&self.body.engine
	}

	pub fn is_disposed(&self) -> bool {
		self.body.disposed.load(Ordering::Acquire)
	}

	pub fn get<T: PropertyValue>(&self, property: &Property<T>) -> Result<T> {
		let value = self.engine().get(self, property.handle())?;
		downcast(property.handle(), &value)
	}

	pub fn set<T: PropertyValue>(&self, property: &Property<T>, value: T) -> Result<()> {
		self.engine().set(self, property.handle(), Value::new(value))
	}

	pub fn refresh(&self) -> Result<usize> {
		self.engine().refresh(self)
	}

	pub fn dependencies(&self, property: impl AsRef<PropertyHandle>) -> Vec<Dependency> {
		self.engine().dependencies(self, property.as_ref())
	}

	pub fn dispose(&self) {
		self.engine().dispose(self)
	}

	pub fn id(&self) -> Option<ScopeId> {
		self.engine().id_of(self)
	}

	pub fn identity(&self) -> Option<Identity> {
		self.engine().identity_of(self)
	}

	pub fn storage(&self) -> Option<Storage> {
		self.engine().storage_of(self)
	}

	pub fn context(&self) -> Option<Arc<str>> {
		self.engine().context_of(self)
	}
}

fn downcast<T: PropertyValue>(property: &PropertyHandle, value: &Value) -> Result<T> {
	value.downcast::<T>().ok_or_else(|| Error::TypeMismatch {
		property: property.to_string(),
		expected: std::any::type_name::<T>(),
		found: value.type_name(),
	})
}

impl PartialEq for Scope {
	fn eq(&self, other: &Self) -> bool {
		self.body.key == other.body.key
	}
}

impl Eq for Scope {}

impl Hash for Scope {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.body.key.hash(state)
	}
}

impl Display for Scope {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}{}", self.body.ty, self.body.key)
	}
}

impl Debug for Scope {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		Display::fmt(self, f)
	}
}
