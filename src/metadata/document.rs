//! Data model for parsed federation metadata.
//!
//! Every type here is immutable once constructed; a refresh replaces records wholesale rather
//! than mutating them in place.

// std
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
// crates.io
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
// self
use crate::_prelude::*;

/// Normalized identifier of one trust participant, typically a URI.
///
/// Surrounding whitespace is trimmed on construction; comparison is exact string comparison
/// afterwards.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EntityId(Arc<str>);
impl EntityId {
	/// Construct a normalized entity id.
	pub fn new(value: impl AsRef<str>) -> Self {
		Self(Arc::from(value.as_ref().trim()))
	}

	/// String form of the identifier.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Debug for EntityId {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		write!(f, "EntityId({})", self.0)
	}
}
impl Display for EntityId {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(&self.0)
	}
}
impl From<String> for EntityId {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}
impl From<EntityId> for String {
	fn from(value: EntityId) -> Self {
		value.0.to_string()
	}
}

/// Single sign-on service endpoint advertised by an identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
	/// Binding identifier, e.g. a SAML binding URN.
	pub binding: String,
	/// Location the binding is served at.
	pub location: Url,
}

/// DER-encoded signing certificate, transported as base64.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SigningCertificate {
	der: Arc<[u8]>,
	fingerprint: [u8; 32],
}
impl SigningCertificate {
	/// Construct from raw DER bytes, computing the SHA-256 fingerprint eagerly.
	pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self> {
		let der: Vec<u8> = der.into();

		if der.is_empty() {
			return Err(Error::Parse("Signing certificate must not be empty.".into()));
		}

		let digest = Sha256::digest(&der);
		let mut fingerprint = [0u8; 32];

		fingerprint.copy_from_slice(&digest);

		Ok(Self { der: Arc::from(der), fingerprint })
	}

	/// Decode a base64 DER payload (standard or URL-safe alphabet, whitespace tolerated).
	pub fn from_b64(value: &str) -> Result<Self> {
		let cleaned: String = value.split_whitespace().collect();
		let decoded = BASE64_STANDARD
			.decode(cleaned.as_bytes())
			.or_else(|_| BASE64_URL_SAFE_NO_PAD.decode(cleaned.as_bytes()))
			.map_err(|err| Error::Parse(format!("Invalid base64 certificate: {err}.")))?;

		Self::from_der(decoded)
	}

	/// Raw DER bytes.
	pub fn der(&self) -> &[u8] {
		&self.der
	}

	/// SHA-256 fingerprint of the DER payload.
	pub fn fingerprint(&self) -> &[u8; 32] {
		&self.fingerprint
	}

	/// Base64 form of the fingerprint, for logs and comparisons.
	pub fn fingerprint_b64(&self) -> String {
		BASE64_STANDARD.encode(self.fingerprint)
	}
}
impl Debug for SigningCertificate {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		write!(f, "SigningCertificate(sha256:{})", self.fingerprint_b64())
	}
}
impl TryFrom<String> for SigningCertificate {
	type Error = Error;

	fn try_from(value: String) -> Result<Self> {
		Self::from_b64(&value)
	}
}
impl From<SigningCertificate> for String {
	fn from(value: SigningCertificate) -> Self {
		BASE64_STANDARD.encode(value.der.as_ref())
	}
}

/// Declared signing material of a metadata document.
///
/// Carried verbatim to the trust validator; this crate never interprets it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentSignature {
	/// Optional hint naming the signing key.
	pub key_name: Option<String>,
	/// Signature algorithm identifier.
	pub algorithm: Option<String>,
	/// Decoded signature bytes.
	pub value: Vec<u8>,
}

/// Immutable trust record for one identity provider.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProvider {
	entity_id: EntityId,
	single_sign_on_services: Vec<Endpoint>,
	signing_certificates: Vec<SigningCertificate>,
	want_authn_requests_signed: bool,
}
impl IdentityProvider {
	/// Construct a provider record.
	pub fn new(
		entity_id: EntityId,
		single_sign_on_services: Vec<Endpoint>,
		signing_certificates: Vec<SigningCertificate>,
		want_authn_requests_signed: bool,
	) -> Self {
		Self { entity_id, single_sign_on_services, signing_certificates, want_authn_requests_signed }
	}

	/// Identifier of this provider within the federation.
	pub fn entity_id(&self) -> &EntityId {
		&self.entity_id
	}

	/// Advertised single sign-on endpoints.
	pub fn single_sign_on_services(&self) -> &[Endpoint] {
		&self.single_sign_on_services
	}

	/// Signing certificates trusted for this provider's assertions.
	pub fn signing_certificates(&self) -> &[SigningCertificate] {
		&self.signing_certificates
	}

	/// Whether the provider requires signed authentication requests.
	pub fn want_authn_requests_signed(&self) -> bool {
		self.want_authn_requests_signed
	}
}

/// Parsed result of one metadata fetch: a validity deadline plus the declared membership.
///
/// Providers are unique by [`EntityId`]; the parser rejects documents violating that.
#[derive(Clone, Debug)]
pub struct MetadataDocument {
	name: Option<String>,
	valid_until: DateTime<Utc>,
	providers: Vec<Arc<IdentityProvider>>,
}
impl MetadataDocument {
	pub(crate) fn new(
		name: Option<String>,
		valid_until: DateTime<Utc>,
		providers: Vec<Arc<IdentityProvider>>,
	) -> Self {
		Self { name, valid_until, providers }
	}

	/// Federation name declared by the aggregate, if any.
	pub fn name(&self) -> Option<&str> {
		self.name.as_deref()
	}

	/// Deadline after which this document must not be relied upon without a refresh.
	pub fn valid_until(&self) -> DateTime<Utc> {
		self.valid_until
	}

	/// Declared identity providers.
	pub fn providers(&self) -> &[Arc<IdentityProvider>] {
		&self.providers
	}
}
