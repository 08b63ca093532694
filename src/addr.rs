use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Compares and hashes an `Arc` by the address it points to rather than
/// by the pointee.
pub struct ArcAddr<T: ?Sized> {
	ptr: Arc<T>,
}

impl<T: ?Sized> ArcAddr<T> {
	pub fn new(ptr: Arc<T>) -> Self {
		ArcAddr { ptr }
	}

	fn addr(&self) -> *const () {
		Arc::as_ptr(&self.ptr) as *const ()
	}
}

impl<T: ?Sized> Clone for ArcAddr<T> {
	fn clone(&self) -> Self {
		ArcAddr {
			ptr: self.ptr.clone(),
		}
	}
}

impl<T: ?Sized> Deref for ArcAddr<T> {
	type Target = Arc<T>;
	fn deref(&self) -> &Self::Target {
		&self.ptr
	}
}

impl<T: ?Sized> PartialEq for ArcAddr<T> {
	fn eq(&self, other: &Self) -> bool {
		self.addr() == other.addr()
	}
}

impl<T: ?Sized> Eq for ArcAddr<T> {}

impl<T: ?Sized> Hash for ArcAddr<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.addr().hash(state)
	}
}
