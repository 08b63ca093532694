use std::any::TypeId;
use std::fmt::{Debug, Display};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::addr::ArcAddr;
use crate::error::{Error, Result, ValidationError, Violation};
use crate::scope::Scope;
use crate::value::{PropertyValue, Value};

pub(crate) type ErasedGet = Box<dyn Fn(&Scope) -> Result<Value> + Send + Sync>;
pub(crate) type ErasedSet = Box<dyn Fn(&Scope, Value) -> Result<()> + Send + Sync>;
type ErasedPredicate = Box<dyn Fn(&Scope) -> Result<bool> + Send + Sync>;
type ErasedCheck = Box<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

pub(crate) enum PropertyKind {
	/// A plain field. The value lives in the cache, seeded from the default.
	Stored(Value),
	/// Derived on demand from other properties.
	Computed(ErasedGet),
}

pub(crate) struct Rule {
	name: &'static str,
	check: ErasedCheck,
}

pub(crate) struct ExtensionDef {
	name: &'static str,
	priority: i32,
	applies: Option<ErasedPredicate>,
	get: Option<ErasedGet>,
	set: Option<ErasedSet>,
}

impl ExtensionDef {
	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn applies(&self, scope: &Scope) -> Result<bool> {
		match &self.applies {
			Some(applies) => applies(scope),
			None => Ok(true),
		}
	}

	pub fn getter(&self) -> Option<&ErasedGet> {
		self.get.as_ref()
	}

	pub fn setter(&self) -> Option<&ErasedSet> {
		self.set.as_ref()
	}
}

pub(crate) struct PropertyDef {
	contract: &'static str,
	name: &'static str,
	value_type: TypeId,
	value_type_name: &'static str,
	kind: PropertyKind,
	rules: Vec<Rule>,
	extensions: Vec<ExtensionDef>,
}

impl PropertyDef {
	pub(crate) fn kind(&self) -> &PropertyKind {
		&self.kind
	}

	/// Extensions ordered by descending priority, then declaration order.
	pub(crate) fn extensions(&self) -> &[ExtensionDef] {
		&self.extensions
	}

	pub(crate) fn check_type(&self, value: &Value) -> Result<()> {
		if value.type_id() == self.value_type {
			return Ok(());
		}
		Err(Error::TypeMismatch {
			property: format!("{}.{}", self.contract, self.name),
			expected: self.value_type_name,
			found: value.type_name(),
		})
	}

	/// Runs every rule, collecting one violation per failing rule.
	pub(crate) fn validate(&self, value: &Value) -> Result<(), ValidationError> {
		let violations = self
			.rules
			.iter()
			.filter_map(|rule| match (rule.check)(value) {
				Ok(()) => None,
				Err(message) => Some(Violation {
					rule: rule.name,
					message,
				}),
			})
			.collect::<Vec<_>>();

		if violations.is_empty() {
			Ok(())
		} else {
			Err(ValidationError {
				property: format!("{}.{}", self.contract, self.name),
				violations,
			})
		}
	}
}

/// Untyped, stable identifier of one property on one contract.
///
/// Handles compare by the identity of the declaration they were built
/// from, never by name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PropertyHandle {
	def: ArcAddr<PropertyDef>,
}

impl PropertyHandle {
	pub fn contract(&self) -> &'static str {
		self.def.contract
	}

	pub fn name(&self) -> &'static str {
		self.def.name
	}

	pub fn is_computed(&self) -> bool {
		matches!(self.def.kind, PropertyKind::Computed(_))
	}

	pub fn value_type_name(&self) -> &'static str {
		self.def.value_type_name
	}

	pub(crate) fn def(&self) -> &PropertyDef {
		&self.def
	}
}

impl AsRef<PropertyHandle> for PropertyHandle {
	fn as_ref(&self) -> &PropertyHandle {
		self
	}
}

impl Debug for PropertyHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}", self.def.contract, self.def.name)
	}
}

impl Display for PropertyHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}", self.def.contract, self.def.name)
	}
}

/// Typed handle used by scope-backed types to route reads and writes into
/// the engine.
pub struct Property<T> {
	handle: PropertyHandle,
	_marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Property<T> {
	fn clone(&self) -> Self {
		Property {
			handle: self.handle.clone(),
			_marker: PhantomData,
		}
	}
}

impl<T> Debug for Property<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		Debug::fmt(&self.handle, f)
	}
}

impl<T> AsRef<PropertyHandle> for Property<T> {
	fn as_ref(&self) -> &PropertyHandle {
		&self.handle
	}
}

impl<T: PropertyValue> Property<T> {
	/// Declares a settable field that reads as `default` until written.
	pub fn stored(contract: &'static str, name: &'static str, default: T) -> PropertyBuilder<T> {
		PropertyBuilder::new(contract, name, PropertyKind::Stored(Value::new(default)))
	}

	/// Declares a property derived from whatever `compute` reads.
	pub fn computed<F>(contract: &'static str, name: &'static str, compute: F) -> PropertyBuilder<T>
	where
		F: Fn(&Scope) -> Result<T> + Send + Sync + 'static,
	{
		PropertyBuilder::new(
			contract,
			name,
			PropertyKind::Computed(Box::new(move |scope: &Scope| compute(scope).map(Value::new))),
		)
	}

	pub fn handle(&self) -> &PropertyHandle {
		&self.handle
	}

	pub fn name(&self) -> &'static str {
		self.handle.name()
	}

	pub fn contract(&self) -> &'static str {
		self.handle.contract()
	}
}

pub struct PropertyBuilder<T> {
	def: PropertyDef,
	_marker: PhantomData<fn() -> T>,
}

impl<T: PropertyValue> PropertyBuilder<T> {
	fn new(contract: &'static str, name: &'static str, kind: PropertyKind) -> Self {
		PropertyBuilder {
			def: PropertyDef {
				contract,
				name,
				value_type: TypeId::of::<T>(),
				value_type_name: std::any::type_name::<T>(),
				kind,
				rules: Vec::new(),
				extensions: Vec::new(),
			},
			_marker: PhantomData,
		}
	}

	/// Adds a validation rule. `check` returns the violation message on
	/// failure.
	pub fn rule<F>(mut self, name: &'static str, check: F) -> Self
	where
		F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
	{
		self.def.rules.push(Rule {
			name,
			check: Box::new(move |value: &Value| match value.downcast_ref::<T>() {
				Some(value) => check(value),
				None => Err(format!("expected {}", std::any::type_name::<T>())),
			}),
		});
		self
	}

	/// Attaches an extension. Only consulted for computed properties.
	pub fn extend(mut self, extension: Extension<T>) -> Self {
		let property = format!("{}.{}", self.def.contract, self.def.name);
		let Extension {
			name,
			priority,
			applies,
			get,
			set,
			..
		} = extension;

		self.def.extensions.push(ExtensionDef {
			name,
			priority,
			applies,
			get: get.map(|get| -> ErasedGet {
				Box::new(move |scope: &Scope| get(scope).map(Value::new))
			}),
			set: set.map(|set| -> ErasedSet {
				Box::new(move |scope: &Scope, value: Value| {
					let typed = value.downcast::<T>().ok_or_else(|| Error::TypeMismatch {
						property: property.clone(),
						expected: std::any::type_name::<T>(),
						found: value.type_name(),
					})?;
					set(scope, typed)
				})
			}),
		});
		self
	}

	pub fn build(mut self) -> Property<T> {
		self.def
			.extensions
			.sort_by_key(|extension| std::cmp::Reverse(extension.priority));

		Property {
			handle: PropertyHandle {
				def: ArcAddr::new(Arc::new(self.def)),
			},
			_marker: PhantomData,
		}
	}
}

type TypedGet<T> = Box<dyn Fn(&Scope) -> Result<T> + Send + Sync>;
type TypedSet<T> = Box<dyn Fn(&Scope, T) -> Result<()> + Send + Sync>;

/// An alternative implementation of a computed property, selected at run
/// time when its predicate holds for the scope being read or written.
pub struct Extension<T> {
	name: &'static str,
	priority: i32,
	applies: Option<ErasedPredicate>,
	get: Option<TypedGet<T>>,
	set: Option<TypedSet<T>>,
}

impl<T: PropertyValue> Extension<T> {
	pub fn new(name: &'static str) -> Self {
		Extension {
			name,
			priority: 0,
			applies: None,
			get: None,
			set: None,
		}
	}

	/// Higher priorities are tried first. Equal priorities keep declaration
	/// order.
	pub fn priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	pub fn when<F>(mut self, applies: F) -> Self
	where
		F: Fn(&Scope) -> Result<bool> + Send + Sync + 'static,
	{
		self.applies = Some(Box::new(applies));
		self
	}

	pub fn get<F>(mut self, get: F) -> Self
	where
		F: Fn(&Scope) -> Result<T> + Send + Sync + 'static,
	{
		self.get = Some(Box::new(get));
		self
	}

	pub fn set<F>(mut self, set: F) -> Self
	where
		F: Fn(&Scope, T) -> Result<()> + Send + Sync + 'static,
	{
		self.set = Some(Box::new(set));
		self
	}
}
