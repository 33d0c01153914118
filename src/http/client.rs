//! HTTP retrieval of federation metadata documents.

// std
use std::time::Instant;
// crates.io
use reqwest::Client;
// self
use crate::{_prelude::*, federation::FederationConfig, security};

/// Execute one GET of the configured metadata source, returning the raw document bytes.
///
/// No retries happen at this layer; the refresh schedule provides the retry cadence.
pub async fn fetch_metadata(client: &Client, config: &FederationConfig) -> Result<Vec<u8>> {
	if config.require_https {
		security::enforce_https(&config.metadata_url)?;
	}

	let started = Instant::now();
	let response = client
		.get(config.metadata_url.clone())
		.header("accept", "application/json")
		.timeout(config.fetch_timeout)
		.send()
		.await?;
	let status = response.status();

	if !status.is_success() {
		let body = response.text().await.ok();

		return Err(Error::HttpStatus { status, url: config.metadata_url.clone(), body });
	}

	let bytes = response.bytes().await?;

	if bytes.len() as u64 > config.max_response_bytes {
		return Err(Error::Security(format!(
			"Metadata response of {size} bytes exceeds the configured guard of {limit} bytes.",
			size = bytes.len(),
			limit = config.max_response_bytes
		)));
	}

	tracing::debug!(
		url = %config.metadata_url,
		status = %status,
		bytes = bytes.len(),
		elapsed = ?started.elapsed(),
		"metadata fetch complete"
	);

	Ok(bytes.to_vec())
}
