//! Memoized scope properties with dynamically discovered dependencies.
//!
//! A [`Scope`] exposes stored and computed [`Property`] values. Reading a
//! computed property records every other property it touched; writing a
//! stored property evicts everything that transitively read it, and
//! [`Scope::refresh`] recomputes those entries, notifying only on real change.

pub mod macros;

mod addr;
mod batch;
mod cache;
mod config;
mod dependencies;
mod dispatch;
mod engine;
mod error;
mod evaluation;
mod events;
mod identity;
mod key;
mod property;
mod registry;
mod scope;
mod speculation;
mod value;

pub use config::Config;
pub use engine::{Dependency, Engine, Stats};
pub use error::{Error, Result, ValidationError, Violation};
pub use evaluation::untracked;
pub use events::{PropertyChanged, ScopeInvalidated, ScopeRegistered, Subscription};
pub use identity::{Identity, IdentityKey};
pub use key::{CacheKey, ScopeKey};
pub use property::{Extension, Property, PropertyBuilder, PropertyHandle};
pub use registry::{Registration, Storage};
pub use scope::{Scope, ScopeId, ScopeType};
pub use speculation::Speculation;
pub use value::{PropertyValue, Value};
