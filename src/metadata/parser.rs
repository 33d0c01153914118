//! Structural parsing of federation metadata documents.
//!
//! This module validates structure, enforces entity-id uniqueness, and computes the validity
//! deadline. Cryptographic verification of the document is delegated to the [`TrustValidator`]
//! collaborator supplied through the federation configuration.

// std
use std::{collections::HashSet, fmt::Debug};
// crates.io
use base64::prelude::*;
use chrono::TimeDelta;
use serde::Deserialize;
// self
use crate::{
	_prelude::*,
	metadata::document::{
		DocumentSignature, Endpoint, EntityId, IdentityProvider, MetadataDocument,
		SigningCertificate,
	},
};

/// Trust/signature verification collaborator.
///
/// Consulted with the parsed candidate document and its declared signing material before the
/// document is considered usable; a rejection reason is surfaced as [`Error::Trust`].
pub trait TrustValidator: Debug + Send + Sync {
	/// Accept or reject the candidate document.
	fn verify(
		&self,
		document: &MetadataDocument,
		signature: Option<&DocumentSignature>,
	) -> std::result::Result<(), String>;
}

/// Validator that accepts every document without verification.
///
/// Intended for tests and development against trusted local sources; production deployments
/// must supply a real signature validator.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnverifiedTrust;
impl TrustValidator for UnverifiedTrust {
	fn verify(
		&self,
		_: &MetadataDocument,
		_: Option<&DocumentSignature>,
	) -> std::result::Result<(), String> {
		Ok(())
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
	#[serde(default)]
	name: Option<String>,
	#[serde(default)]
	valid_until: Option<DateTime<Utc>>,
	#[serde(default)]
	cache_duration: Option<String>,
	#[serde(default)]
	signature: Option<RawSignature>,
	#[serde(default)]
	identity_providers: Vec<RawProvider>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSignature {
	#[serde(default)]
	key_name: Option<String>,
	#[serde(default)]
	algorithm: Option<String>,
	value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProvider {
	entity_id: String,
	#[serde(default)]
	single_sign_on_services: Vec<Endpoint>,
	#[serde(default)]
	signing_certificates: Vec<String>,
	#[serde(default)]
	want_authn_requests_signed: bool,
}

/// Parse raw metadata bytes fetched at `fetched_at` into an immutable document.
///
/// The validity deadline is computed with this precedence:
/// 1. an explicit `validUntil` instant is used verbatim,
/// 2. otherwise `fetched_at + cacheDuration`,
/// 3. otherwise the document is rejected with [`Error::MissingValidity`] — a document with no
///    validity signal cannot be scheduled.
pub fn parse(
	raw: &[u8],
	fetched_at: DateTime<Utc>,
	validator: &dyn TrustValidator,
) -> Result<MetadataDocument> {
	let raw: RawDocument = serde_json::from_slice(raw).map_err(|err| Error::Parse(err.to_string()))?;

	if raw.identity_providers.is_empty() {
		return Err(Error::Parse(
			"Metadata document must contain at least one identity provider descriptor.".into(),
		));
	}

	let mut seen = HashSet::with_capacity(raw.identity_providers.len());
	let mut providers = Vec::with_capacity(raw.identity_providers.len());

	for descriptor in raw.identity_providers {
		let entity_id = EntityId::new(&descriptor.entity_id);

		if entity_id.as_str().is_empty() {
			return Err(Error::Parse("Identity provider entityId must not be empty.".into()));
		}
		if !seen.insert(entity_id.clone()) {
			return Err(Error::Parse(format!(
				"Duplicate entityId '{entity_id}' within metadata document."
			)));
		}

		let mut certificates = Vec::with_capacity(descriptor.signing_certificates.len());

		for certificate in &descriptor.signing_certificates {
			certificates.push(SigningCertificate::from_b64(certificate)?);
		}

		providers.push(Arc::new(IdentityProvider::new(
			entity_id,
			descriptor.single_sign_on_services,
			certificates,
			descriptor.want_authn_requests_signed,
		)));
	}

	let valid_until = compute_validity(raw.valid_until, raw.cache_duration.as_deref(), fetched_at)?;
	let signature = raw.signature.map(decode_signature).transpose()?;
	let document = MetadataDocument::new(raw.name, valid_until, providers);

	validator.verify(&document, signature.as_ref()).map_err(Error::Trust)?;

	tracing::debug!(
		providers = document.providers().len(),
		valid_until = %document.valid_until(),
		"parsed federation metadata"
	);

	Ok(document)
}

fn compute_validity(
	valid_until: Option<DateTime<Utc>>,
	cache_duration: Option<&str>,
	fetched_at: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
	if let Some(valid_until) = valid_until {
		return Ok(valid_until);
	}
	if let Some(cache_duration) = cache_duration {
		let duration = parse_cache_duration(cache_duration)?;
		let delta = TimeDelta::from_std(duration)
			.map_err(|_| Error::Parse(format!("cacheDuration '{cache_duration}' is out of range.")))?;

		return fetched_at.checked_add_signed(delta).ok_or_else(|| {
			Error::Parse(format!(
				"cacheDuration '{cache_duration}' overflows the representable time range."
			))
		});
	}

	Err(Error::MissingValidity)
}

fn decode_signature(raw: RawSignature) -> Result<DocumentSignature> {
	let cleaned: String = raw.value.split_whitespace().collect();
	let value = BASE64_STANDARD
		.decode(cleaned.as_bytes())
		.or_else(|_| BASE64_URL_SAFE_NO_PAD.decode(cleaned.as_bytes()))
		.map_err(|err| Error::Parse(format!("Invalid base64 signature value: {err}.")))?;

	Ok(DocumentSignature { key_name: raw.key_name, algorithm: raw.algorithm, value })
}

/// Parse an `xs:duration`-style value (`PnYnMnDTnHnMnS`).
///
/// Years and months use calendar approximations (365 and 30 days); the cache duration is a
/// scheduling hint, not a calendar computation.
fn parse_cache_duration(value: &str) -> Result<Duration> {
	let fail = |reason: &str| Error::Parse(format!("Invalid cacheDuration '{value}': {reason}."));
	let mut rest = value.trim();

	if rest.starts_with('-') {
		return Err(fail("negative durations are not allowed"));
	}

	rest = rest.strip_prefix('P').ok_or_else(|| fail("must start with 'P'"))?;

	let mut seconds = 0f64;
	let mut in_time = false;
	let mut saw_component = false;

	while !rest.is_empty() {
		if !in_time && let Some(stripped) = rest.strip_prefix('T') {
			in_time = true;
			rest = stripped;

			continue;
		}

		let digits_end = rest
			.find(|c: char| !c.is_ascii_digit() && c != '.')
			.ok_or_else(|| fail("missing component designator"))?;
		let (number, tail) = rest.split_at(digits_end);
		let number: f64 = number.parse().map_err(|_| fail("invalid number"))?;
		let mut tail_chars = tail.chars();
		let designator = tail_chars.next().ok_or_else(|| fail("missing component designator"))?;

		rest = tail_chars.as_str();
		saw_component = true;

		let factor = match (designator, in_time) {
			('Y', false) => 365.0 * 86_400.0,
			('M', false) => 30.0 * 86_400.0,
			('D', false) => 86_400.0,
			('H', true) => 3_600.0,
			('M', true) => 60.0,
			('S', true) => 1.0,
			_ => return Err(fail("unexpected component designator")),
		};

		seconds += number * factor;
	}

	if !saw_component {
		return Err(fail("must contain at least one component"));
	}
	if !seconds.is_finite() || seconds > u32::MAX as f64 {
		return Err(fail("out of range"));
	}

	Ok(Duration::from_secs_f64(seconds))
}
