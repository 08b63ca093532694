use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

/// Bound shared by everything a property can hold.
pub trait PropertyValue: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> PropertyValue for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

trait Erased: Send + Sync + 'static {
	fn as_any(&self) -> &dyn Any;
	fn dyn_eq(&self, other: &dyn Erased) -> bool;
	fn fmt_debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;
	fn type_name(&self) -> &'static str;
}

impl<T> Erased for T
where
	T: PropertyValue,
{
	fn as_any(&self) -> &dyn Any {
		self
	}

	fn dyn_eq(&self, other: &dyn Erased) -> bool {
		match other.as_any().downcast_ref::<T>() {
			Some(other) => self == other,
			None => false,
		}
	}

	fn fmt_debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		Debug::fmt(self, f)
	}

	fn type_name(&self) -> &'static str {
		std::any::type_name::<T>()
	}
}

/// A type-erased property value.
///
/// Cloning is cheap. Two values are equal when they hold the same concrete
/// type and that type's `PartialEq` says so.
#[derive(Clone)]
pub struct Value {
	inner: Arc<dyn Erased>,
}

impl Value {
	pub fn new<T: PropertyValue>(value: T) -> Self {
		Value {
			inner: Arc::new(value),
		}
	}

	pub fn is<T: 'static>(&self) -> bool {
		self.inner.as_any().type_id() == TypeId::of::<T>()
	}

	pub fn type_id(&self) -> TypeId {
		self.inner.as_any().type_id()
	}

	pub fn type_name(&self) -> &'static str {
		self.inner.type_name()
	}

	pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
		self.inner.as_any().downcast_ref::<T>()
	}

	pub fn downcast<T: Clone + 'static>(&self) -> Option<T> {
		self.downcast_ref::<T>().cloned()
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner) || self.inner.dyn_eq(&*other.inner)
	}
}

impl Debug for Value {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.inner.fmt_debug(f)
	}
}
