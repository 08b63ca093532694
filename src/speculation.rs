use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use fxhash::FxHashSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{Dependency, Engine};
use crate::error::{Error, Result};
use crate::evaluation::{self, Evaluation};
use crate::key::CacheKey;
use crate::property::PropertyHandle;
use crate::scope::Scope;

/// Outcome of an arbitrary computation together with every property it
/// read, directly or through nested computations.
///
/// Lets a caller memoize the outcome outside the property system and
/// discard it once any of those inputs is invalidated.
pub struct Speculation<T> {
	outcome: Result<T>,
	dependencies: FxHashSet<CacheKey>,
	revision: u64,
	engine: Engine,
}

impl<T> Speculation<T> {
	pub fn outcome(&self) -> &Result<T> {
		&self.outcome
	}

	pub fn into_outcome(self) -> Result<T> {
		self.outcome
	}

	pub fn dependencies(&self) -> Vec<Dependency> {
		self.engine.resolve_keys(self.dependencies.iter().cloned())
	}

	pub fn depends_on(&self, scope: &Scope, property: impl AsRef<PropertyHandle>) -> bool {
		self.dependencies
			.contains(&CacheKey::new(scope.key(), property.as_ref().clone()))
	}

	/// True while nothing this computation read has been invalidated since it
	/// started.
	pub fn is_current(&self) -> bool {
		self.engine
			.unchanged_since(&self.dependencies, self.revision)
	}
}

impl<T: std::fmt::Debug> std::fmt::Debug for Speculation<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Speculation")
			.field("outcome", &self.outcome)
			.field("dependencies", &self.dependencies.len())
			.field("revision", &self.revision)
			.finish()
	}
}

impl Engine {
	/// Runs `computation`, recording every property read anywhere beneath it,
	/// including across `.await` points. Nothing is committed to the
	/// dependency graph.
	pub async fn evaluate_recording<T, F>(&self, computation: F) -> Speculation<T>
	where
		F: Future<Output = Result<T>>,
	{
		let revision = self.revision();
		let evaluation = Evaluation::root();

		let outcome = evaluation::recording(
			evaluation.clone(),
			AssertUnwindSafe(computation).catch_unwind(),
		)
		.await
		.unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload))));

		Speculation {
			outcome,
			dependencies: evaluation.take(),
			revision,
			engine: self.clone(),
		}
	}

	/// Like [`Engine::evaluate_recording`], but gives up once `token` is
	/// cancelled. A cancelled speculation fails with [`Error::Cancelled`] and
	/// reports no dependencies.
	pub async fn evaluate_recording_until<T, F>(
		&self,
		token: CancellationToken,
		computation: F,
	) -> Speculation<T>
	where
		F: Future<Output = Result<T>>,
	{
		let revision = self.revision();

		tokio::select! {
			biased;
			_ = token.cancelled() => {
				debug!(label = %self.config().label, "speculation cancelled");
				Speculation {
					outcome: Err(Error::Cancelled),
					dependencies: FxHashSet::default(),
					revision,
					engine: self.clone(),
				}
			}
			speculation = self.evaluate_recording(computation) => speculation,
		}
	}
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		message.to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic".to_string()
	}
}
