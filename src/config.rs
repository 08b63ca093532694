use std::borrow::Cow;

#[derive(Debug, Clone)]
pub struct Config {
	/// Name attached to the engine's log events.
	pub label: Cow<'static, str>,
	/// How many computations may nest inside each other before a read fails
	/// with [`Error::DepthExceeded`](crate::Error::DepthExceeded).
	pub max_depth: usize,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			label: Cow::Borrowed("scope"),
			max_depth: 128,
		}
	}
}

impl Config {
	pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
		self.label = label.into();
		self
	}

	pub fn max_depth(mut self, max_depth: usize) -> Self {
		self.max_depth = max_depth;
		self
	}
}
