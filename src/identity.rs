use std::any::Any;
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Anything that can identify a scope.
pub trait IdentityKey: Hash + Eq + Debug + Send + Sync + 'static {}

impl<T> IdentityKey for T where T: Hash + Eq + Debug + Send + Sync + 'static {}

trait ErasedKey: Send + Sync + 'static {
	fn as_any(&self) -> &dyn Any;
	fn dyn_eq(&self, other: &dyn ErasedKey) -> bool;
	fn dyn_hash(&self, state: &mut dyn Hasher);
	fn fmt_debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;
}

impl<T: IdentityKey> ErasedKey for T {
	fn as_any(&self) -> &dyn Any {
		self
	}

	fn dyn_eq(&self, other: &dyn ErasedKey) -> bool {
		other
			.as_any()
			.downcast_ref::<T>()
			.map_or(false, |other| self == other)
	}

	fn dyn_hash(&self, mut state: &mut dyn Hasher) {
		self.as_any().type_id().hash(&mut state);
		self.hash(&mut state);
	}

	fn fmt_debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		Debug::fmt(self, f)
	}
}

/// Type-erased identity of a scope instance.
#[derive(Clone)]
pub struct Identity {
	key: Arc<dyn ErasedKey>,
}

impl Identity {
	pub fn new<K: IdentityKey>(key: K) -> Self {
		Identity { key: Arc::new(key) }
	}

	pub fn downcast_ref<K: 'static>(&self) -> Option<&K> {
		self.key.as_any().downcast_ref::<K>()
	}
}

impl PartialEq for Identity {
	fn eq(&self, other: &Self) -> bool {
		self.key.dyn_eq(&*other.key)
	}
}

impl Eq for Identity {}

impl Hash for Identity {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.key.dyn_hash(state)
	}
}

impl Debug for Identity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.key.fmt_debug(f)
	}
}

impl Display for Identity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.key.fmt_debug(f)
	}
}
