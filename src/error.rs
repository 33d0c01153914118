//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the federation metadata cache crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),

	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, body: Option<String> },

	#[error("Configuration error for {field}: {reason}")]
	Configuration { field: &'static str, reason: String },
	#[error("Federation has been disposed; no further refreshes are possible.")]
	Disposed,
	#[error("Metadata document declares neither a validUntil instant nor a cacheDuration.")]
	MissingValidity,
	#[error("Malformed federation metadata: {0}")]
	Parse(String),
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Federation metadata rejected by trust validator: {0}")]
	Trust(String),

	#[cfg(feature = "prometheus")]
	#[error("Metrics error: {0}")]
	Metrics(String),
}
impl Error {
	/// Classify the error for failure reporting.
	///
	/// Scheduled-refresh failures are surfaced to the failure observer as a kind plus the source
	/// URL. The kind carries no retry semantics; every refresh error is retried on the next
	/// scheduled cycle.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Reqwest(_) | Self::HttpStatus { .. } => ErrorKind::Fetch,
			Self::Configuration { .. } | Self::Disposed => ErrorKind::Configuration,
			Self::MissingValidity => ErrorKind::MissingValidity,
			Self::Parse(_) => ErrorKind::Parse,
			Self::Security(_) => ErrorKind::Security,
			Self::Trust(_) => ErrorKind::Trust,
			#[cfg(feature = "prometheus")]
			Self::Metrics(_) => ErrorKind::Configuration,
		}
	}
}

/// Coarse error classification reported to failure observers.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
	Configuration,
	Fetch,
	MissingValidity,
	Parse,
	Security,
	Trust,
}
impl std::fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Configuration => "configuration",
			Self::Fetch => "fetch",
			Self::MissingValidity => "missing-validity",
			Self::Parse => "parse",
			Self::Security => "security",
			Self::Trust => "trust",
		};

		f.write_str(name)
	}
}
