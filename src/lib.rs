//! Continuously refreshed federation metadata cache with scheduled revalidation, atomic registry
//! publication, and failure isolation — built for modern Rust identity systems.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod http;
pub mod metadata;
pub mod metrics;
pub mod scheduler;
pub mod security;

mod error;
mod federation;
mod registry;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};

	pub use crate::{Error, Result};
}

pub use crate::{
	error::{Error, ErrorKind, Result},
	federation::{FailureObserver, Federation, FederationConfig, FederationState, FederationStatus},
	metadata::{
		document::{
			DocumentSignature, Endpoint, EntityId, IdentityProvider, MetadataDocument,
			SigningCertificate,
		},
		parser::{TrustValidator, UnverifiedTrust},
	},
	registry::{IdentityProviderRegistry, RegistryDelta},
	scheduler::RefreshScheduler,
};
#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
