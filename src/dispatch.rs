use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::property::{ExtensionDef, PropertyHandle};
use crate::scope::Scope;

tokio::task_local! {
	static RESOLVING: Option<Arc<Resolution>>;
}

/// One in-progress resolution on the current call chain.
struct Resolution {
	key: CacheKey,
	parent: Option<Arc<Resolution>>,
}

impl Resolution {
	fn contains(&self, key: &CacheKey) -> bool {
		let mut frame = Some(self);
		while let Some(resolution) = frame {
			if resolution.key == *key {
				return true;
			}
			frame = resolution.parent.as_deref();
		}
		false
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
	Get,
	Set,
}

impl Access {
	fn supported_by(self, extension: &ExtensionDef) -> bool {
		match self {
			Access::Get => extension.getter().is_some(),
			Access::Set => extension.setter().is_some(),
		}
	}
}

/// Picks the extension of `property` that implements `access` for `scope`.
///
/// Candidates are tried by descending priority, then declaration order; the
/// first whose predicate holds wins. Predicates may read other properties.
/// Re-entering the resolution of the same member on the same call chain is
/// a cycle.
pub(crate) fn resolve<'a>(
	scope: &Scope,
	property: &'a PropertyHandle,
	access: Access,
) -> Result<Option<&'a ExtensionDef>> {
	let mut candidates = property
		.def()
		.extensions()
		.iter()
		.filter(|extension| access.supported_by(extension))
		.peekable();

	if candidates.peek().is_none() {
		return Ok(None);
	}

	let key = CacheKey::new(scope.key(), property.clone());
	let parent = RESOLVING.try_with(|current| current.clone()).ok().flatten();
	if parent.as_ref().map_or(false, |parent| parent.contains(&key)) {
		trace!(%key, ?access, "dispatch cycle");
		return Err(Error::Cycle {
			scope: scope.to_string(),
			member: property.to_string(),
		});
	}

	let resolution = Arc::new(Resolution { key, parent });
	RESOLVING.sync_scope(Some(resolution), || {
		for extension in candidates {
			if extension.applies(scope)? {
				trace!(%property, extension = extension.name(), ?access, "dispatch");
				return Ok(Some(extension));
			}
		}
		Ok(None)
	})
}
