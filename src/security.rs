//! Security utilities covering HTTPS enforcement and source-host allowlists.
//!
//! A metadata source is a trust anchor; these helpers defend the refresh pipeline against
//! plaintext transports and against misdirected source URLs.

// std
use std::collections::HashSet;
// crates.io
use url::Url;
// self
use crate::_prelude::*;

/// Canonical form of a DNS name: trimmed, trailing dot removed, lowercased.
pub fn canonicalize_dns_name(value: &str) -> Option<String> {
	let name = value.trim().trim_end_matches('.');

	if name.is_empty() { None } else { Some(name.to_ascii_lowercase()) }
}

/// Canonicalise an allowlist, dropping empty entries and duplicates.
pub fn normalize_allowlist(domains: Vec<String>) -> Vec<String> {
	let mut seen = HashSet::new();

	domains
		.into_iter()
		.filter_map(|domain| canonicalize_dns_name(&domain))
		.filter(|domain| seen.insert(domain.clone()))
		.collect()
}

/// Ensure the provided URL uses HTTPS.
pub fn enforce_https(url: &Url) -> Result<()> {
	if url.scheme() != "https" {
		return Err(Error::Security(format!("Metadata source URL {url} must use HTTPS.")));
	}

	Ok(())
}

/// Evaluate whether the hostname matches the suffix allowlist.
///
/// An empty allowlist admits every host.
pub fn host_is_allowed(host: &str, allowed_domains: &[String]) -> bool {
	if allowed_domains.is_empty() {
		return true;
	}

	let Some(host) = canonicalize_dns_name(host) else {
		return false;
	};

	allowed_domains.iter().filter_map(|domain| canonicalize_dns_name(domain)).any(|domain| {
		host == domain || host.strip_suffix(&domain).is_some_and(|prefix| prefix.ends_with('.'))
	})
}
