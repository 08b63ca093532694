use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use fxhash::FxHashSet;

use crate::batch::Batch;
use crate::property::PropertyHandle;
use crate::scope::Scope;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct ScopeRegistered {
	pub scope: Scope,
}

/// Raised once per scope touched by a write's invalidation cascade, after
/// the whole cascade has completed.
#[derive(Debug, Clone)]
pub struct ScopeInvalidated {
	pub scope: Scope,
}

#[derive(Debug, Clone)]
pub struct PropertyChanged {
	pub scope: Scope,
	pub property: PropertyHandle,
	pub value: Value,
}

#[derive(Debug, Clone)]
pub(crate) enum Notification {
	Registered(ScopeRegistered),
	Invalidated(ScopeInvalidated),
	Changed(PropertyChanged),
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct ListenersInner<E> {
	next: AtomicU64,
	list: ArcSwap<Vec<(u64, Listener<E>)>>,
}

pub(crate) struct Listeners<E> {
	inner: Arc<ListenersInner<E>>,
}

impl<E: 'static> Default for Listeners<E> {
	fn default() -> Self {
		Listeners {
			inner: Arc::new(ListenersInner {
				next: AtomicU64::new(0),
				list: ArcSwap::from_pointee(Vec::new()),
			}),
		}
	}
}

impl<E: 'static> Listeners<E> {
	pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
		let id = self.inner.next.fetch_add(1, Ordering::Relaxed);
		let listener: Listener<E> = Arc::new(listener);
		self.inner.list.rcu(|list| {
			let mut list = Vec::clone(list);
			list.push((id, listener.clone()));
			list
		});

		let inner: Weak<ListenersInner<E>> = Arc::downgrade(&self.inner);
		Subscription {
			cancel: Some(Box::new(move || {
				if let Some(inner) = inner.upgrade() {
					inner.list.rcu(|list| {
						list.iter()
							.filter(|(other, _)| *other != id)
							.cloned()
							.collect::<Vec<_>>()
					});
				}
			})),
		}
	}

	pub fn emit(&self, event: &E) {
		let list = self.inner.list.load_full();
		for (_, listener) in list.iter() {
			listener(event)
		}
	}
}

/// Keeps a listener attached. Dropping it detaches the listener.
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
	cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
	/// Leaves the listener attached for the lifetime of the engine.
	pub fn detach(mut self) {
		self.cancel = None;
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			cancel()
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("attached", &self.cancel.is_some())
			.finish()
	}
}

/// The engine's notification streams.
#[derive(Default)]
pub(crate) struct Events {
	pub registered: Listeners<ScopeRegistered>,
	pub invalidated: Listeners<ScopeInvalidated>,
	pub changed: Listeners<PropertyChanged>,
	pub batch: Batch,
}

impl Events {
	/// Delivers `notification` now, or queues it while a batch is open.
	pub fn emit(&self, notification: Notification) {
		if let Some(notification) = self.batch.defer(notification) {
			self.deliver(notification);
		}
	}

	/// Delivers everything queued by a finished batch. Invalidations of the
	/// same scope collapse into the first one.
	pub fn flush(&self, queued: Vec<Notification>) {
		let mut invalidated = FxHashSet::default();
		for notification in queued {
			if let Notification::Invalidated(event) = &notification {
				if !invalidated.insert(event.scope.key()) {
					continue;
				}
			}
			self.deliver(notification);
		}
	}

	fn deliver(&self, notification: Notification) {
		match &notification {
			Notification::Registered(event) => self.registered.emit(event),
			Notification::Invalidated(event) => self.invalidated.emit(event),
			Notification::Changed(event) => self.changed.emit(event),
		}
	}
}
