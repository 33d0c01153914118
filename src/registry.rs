//! Shared identity-provider registry and membership diffing.
//!
//! The registry is created and owned by the configuration collaborator and shared by handle;
//! the federation bound to it is its only writer. Mutation is an atomic swap of an immutable
//! snapshot map, so readers never block on a refresh in progress and never observe a partially
//! applied delta.

// std
use std::{
	collections::HashMap,
	sync::{PoisonError, RwLock},
};
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	metadata::document::{EntityId, IdentityProvider, MetadataDocument},
};

/// Immutable point-in-time view of the registry contents.
pub type RegistrySnapshot = Arc<HashMap<EntityId, Arc<IdentityProvider>>>;

/// Shared mapping from [`EntityId`] to the currently trusted provider record.
///
/// Cloning the registry clones a handle to the same underlying map.
#[derive(Clone, Debug, Default)]
pub struct IdentityProviderRegistry {
	inner: Arc<RwLock<RegistrySnapshot>>,
}
impl IdentityProviderRegistry {
	/// Create an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Look up the trust record for one participant.
	pub fn get(&self, entity_id: &EntityId) -> Option<Arc<IdentityProvider>> {
		self.snapshot().get(entity_id).cloned()
	}

	/// Whether the participant is currently trusted.
	pub fn contains(&self, entity_id: &EntityId) -> bool {
		self.snapshot().contains_key(entity_id)
	}

	/// Number of currently trusted providers.
	pub fn len(&self) -> usize {
		self.snapshot().len()
	}

	/// Whether the registry holds no providers.
	pub fn is_empty(&self) -> bool {
		self.snapshot().is_empty()
	}

	/// Currently trusted entity ids.
	pub fn entity_ids(&self) -> Vec<EntityId> {
		self.snapshot().keys().cloned().collect()
	}

	/// Consistent view of the whole registry.
	///
	/// The snapshot corresponds to exactly one completed refresh (or the empty initial state);
	/// it never exposes a partially applied delta.
	pub fn snapshot(&self) -> RegistrySnapshot {
		self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Replace the published membership with the document's, reporting the delta.
	///
	/// Retained participants have their records replaced wholesale so that certificate and
	/// endpoint changes take effect. The post-diff map is published in a single swap.
	pub(crate) fn apply_document(&self, document: &MetadataDocument) -> RegistryDelta {
		let current = self.snapshot();
		let mut next = HashMap::with_capacity(document.providers().len());
		let mut added = Vec::new();
		let mut retained = Vec::new();

		for provider in document.providers() {
			let entity_id = provider.entity_id().clone();

			if current.contains_key(&entity_id) {
				retained.push(entity_id.clone());
			} else {
				added.push(entity_id.clone());
			}

			next.insert(entity_id, provider.clone());
		}

		let removed = current.keys().filter(|id| !next.contains_key(*id)).cloned().collect();

		*self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);

		RegistryDelta { added, removed, retained }
	}
}

/// Membership delta of one applied refresh.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryDelta {
	/// Participants newly inserted by this refresh.
	pub added: Vec<EntityId>,
	/// Participants no longer declared and therefore deleted.
	pub removed: Vec<EntityId>,
	/// Participants present before and after; their records were replaced wholesale.
	pub retained: Vec<EntityId>,
}
impl RegistryDelta {
	/// Whether the refresh left the membership key set unchanged.
	pub fn membership_unchanged(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty()
	}
}
