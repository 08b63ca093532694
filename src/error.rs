use std::fmt::Display;
use std::sync::Arc;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Validation(#[from] ValidationError),

	#[error("computation failed: {0}")]
	Failed(Arc<dyn std::error::Error + Send + Sync>),

	#[error("cycle detected while resolving {member} on {scope}")]
	Cycle { scope: String, member: String },

	#[error("evaluation of {member} nested deeper than {limit} levels")]
	DepthExceeded { limit: usize, member: String },

	#[error("{property} is read-only on {scope}")]
	ReadOnly { scope: String, property: String },

	#[error("{property} holds values of type {expected}, got {found}")]
	TypeMismatch {
		property: String,
		expected: &'static str,
		found: &'static str,
	},

	#[error("{0} has been disposed")]
	Disposed(String),

	#[error("a live canonical scope is already registered for {0}")]
	AlreadyRegistered(String),

	#[error("computation was cancelled")]
	Cancelled,

	#[error("computation panicked: {0}")]
	Panicked(String),
}

impl Error {
	/// Wraps a failure raised by a property computation.
	pub fn failed(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Error::Failed(Arc::from(error.into()))
	}

	pub fn is_cycle(&self) -> bool {
		matches!(self, Error::Cycle { .. })
	}
}

/// One failing validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
	pub rule: &'static str,
	pub message: String,
}

impl Display for Violation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}: {}", self.rule, self.message)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {property}: {}", render(.violations))]
pub struct ValidationError {
	pub property: String,
	pub violations: Vec<Violation>,
}

fn render(violations: &[Violation]) -> String {
	violations
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join("; ")
}
