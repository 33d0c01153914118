//! Federation orchestrator binding one metadata source to one shared registry.
//!
//! A [`Federation`] performs a synchronous initial load during construction, then drives
//! scheduled background refreshes: fetch → parse → diff → atomic publish → reschedule. A failed
//! refresh leaves the last-known-good registry and validity untouched and retries on the
//! scheduler's floor interval; the loop only ends at disposal.

// std
use std::{
	fmt::Debug,
	sync::{
		PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
		atomic::{AtomicU32, Ordering},
	},
	time::Instant,
};
// crates.io
use reqwest::Client;
use serde::Serialize;
use tokio::{
	sync::{Mutex, watch},
	time,
};
use url::Url;
// self
use crate::{
	_prelude::*,
	http::client::fetch_metadata,
	metadata::{
		document::MetadataDocument,
		parser::{self, TrustValidator},
	},
	metrics::FederationMetrics,
	registry::{IdentityProviderRegistry, RegistryDelta},
	scheduler::RefreshScheduler,
	security,
};

/// Default per-request timeout for metadata fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Default size guard for metadata responses (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;

/// Sink notified whenever a scheduled refresh fails.
///
/// Purely for reporting; it cannot affect the refresh loop, which continues on its retry
/// cadence regardless.
pub trait FailureObserver: Debug + Send + Sync {
	/// Report a contained refresh failure for the given source.
	fn refresh_failed(&self, metadata_url: &Url, error: &Error);
}

/// Configuration collaborator surface for one federation.
///
/// The registry is created and owned by the caller; the federation writes into it but never
/// owns it.
#[derive(Clone, Debug)]
pub struct FederationConfig {
	/// Location of the federation metadata document.
	pub metadata_url: Url,
	/// Shared registry this federation populates; the federation is its only writer.
	pub registry: IdentityProviderRegistry,
	/// Signature verification collaborator consulted for every fetched document.
	pub trust_validator: Arc<dyn TrustValidator>,
	/// Optional sink notified on contained refresh failures.
	pub failure_observer: Option<Arc<dyn FailureObserver>>,
	/// Refresh-delay policy.
	pub scheduler: RefreshScheduler,
	/// Whether HTTPS is required for the metadata source.
	pub require_https: bool,
	/// Optional allowlist of domains permitted as metadata sources.
	pub allowed_domains: Vec<String>,
	/// Timeout applied to each metadata fetch.
	pub fetch_timeout: Duration,
	/// Maximum size accepted for metadata responses in bytes.
	pub max_response_bytes: u64,
}
impl FederationConfig {
	/// Construct a configuration with default ambient settings.
	pub fn new(
		metadata_url: impl AsRef<str>,
		registry: IdentityProviderRegistry,
		trust_validator: Arc<dyn TrustValidator>,
	) -> Result<Self> {
		let metadata_url = Url::parse(metadata_url.as_ref()).map_err(|err| Error::Configuration {
			field: "metadata_url",
			reason: format!("Not a valid URL: {err}."),
		})?;

		Ok(Self {
			metadata_url,
			registry,
			trust_validator,
			failure_observer: None,
			scheduler: RefreshScheduler::default(),
			require_https: true,
			allowed_domains: Vec::new(),
			fetch_timeout: DEFAULT_FETCH_TIMEOUT,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
		})
	}

	/// Set HTTPS requirement to the desired value.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Replace the refresh-delay policy.
	pub fn with_scheduler(mut self, scheduler: RefreshScheduler) -> Self {
		self.scheduler = scheduler;

		self
	}

	/// Attach a failure observer.
	pub fn with_failure_observer(mut self, observer: Arc<dyn FailureObserver>) -> Self {
		self.failure_observer = Some(observer);

		self
	}

	/// Replace the source-domain allowlist.
	pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.allowed_domains =
			security::normalize_allowlist(domains.into_iter().map(Into::into).collect());

		self
	}

	/// Validate the configuration against the documented constraints.
	///
	/// No network activity happens before this passes.
	pub fn validate(&self) -> Result<()> {
		if self.require_https {
			security::enforce_https(&self.metadata_url)?;
		}

		let Some(host) = self.metadata_url.host_str() else {
			return Err(Error::Configuration {
				field: "metadata_url",
				reason: "Must include a host component.".into(),
			});
		};

		if !security::host_is_allowed(host, &self.allowed_domains) {
			return Err(Error::Security(format!(
				"Host '{host}' is not within the allowed_domains allowlist."
			)));
		}
		if self.fetch_timeout.is_zero() {
			return Err(Error::Configuration {
				field: "fetch_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Configuration {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}

		self.scheduler.validate()
	}
}

/// Lifecycle state of a federation's refresh engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum FederationState {
	/// Initial synchronous load is running.
	Loading,
	/// Registry reflects the most recent successful refresh.
	Active,
	/// A scheduled or manual refresh is in flight.
	Refreshing,
	/// The refresh schedule has been shut down; the registry will not change again.
	Disposed,
}

/// Point-in-time status projection for one federation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationStatus {
	/// Metadata source this federation is bound to.
	pub metadata_url: Url,
	/// Current lifecycle state.
	pub state: FederationState,
	/// Deadline of the most recently applied document.
	pub metadata_valid_until: DateTime<Utc>,
	/// Timestamp of the most recent successful refresh.
	pub last_refresh: Option<DateTime<Utc>>,
	/// Number of currently trusted providers.
	pub provider_count: usize,
	/// Failed refresh attempts since the last success.
	pub consecutive_failures: u32,
	/// Total successful refreshes, including the initial load.
	pub refresh_successes: u64,
	/// Total failed refresh attempts.
	pub refresh_errors: u64,
}

/// One refresh engine instance, bound to exactly one metadata source and one target registry.
///
/// Created once per source; dropping or [`dispose`](Self::dispose)-ing it releases the
/// background schedule.
#[derive(Debug)]
pub struct Federation {
	inner: Arc<FederationInner>,
	valid_until_rx: watch::Receiver<DateTime<Utc>>,
	shutdown: watch::Sender<bool>,
}
impl Federation {
	/// Bind a metadata source to the configured registry.
	///
	/// Validates the configuration, performs the initial synchronous load, and only then starts
	/// the background refresh schedule. Initial-load errors propagate to the caller; on failure
	/// no schedule exists and no partially-initialized federation is observable.
	pub async fn bind(config: FederationConfig) -> Result<Self> {
		config.validate()?;

		let client = Client::builder()
			.user_agent(format!("federation-cache/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Self::with_client(config, client).await
	}

	/// Bind using the supplied HTTP client (primarily for tests).
	#[tracing::instrument(skip_all, fields(url = %config.metadata_url))]
	pub async fn with_client(config: FederationConfig, client: Client) -> Result<Self> {
		config.validate()?;

		let (valid_until_tx, valid_until_rx) = watch::channel(DateTime::<Utc>::MIN_UTC);
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let inner = Arc::new(FederationInner {
			config,
			client,
			state: RwLock::new(FederationState::Loading),
			valid_until: valid_until_tx,
			last_refresh: RwLock::new(None),
			consecutive_failures: AtomicU32::new(0),
			single_flight: Mutex::new(()),
			metrics: FederationMetrics::new(),
		});
		let delta = inner.refresh_once(RefreshKind::Initial).await?;
		let valid_until = *inner.valid_until.borrow();

		tracing::info!(
			added = delta.added.len(),
			removed = delta.removed.len(),
			retained = delta.retained.len(),
			valid_until = %valid_until,
			"initial federation metadata loaded"
		);

		tokio::spawn(run_refresh_loop(inner.clone(), shutdown_rx));

		Ok(Self { inner, valid_until_rx, shutdown: shutdown_tx })
	}

	/// Deadline of the most recently applied metadata document.
	///
	/// Updated exactly when a refresh (initial or scheduled) completes; callers can watch it to
	/// detect that a refresh happened without inspecting the registry.
	pub fn metadata_valid_until(&self) -> DateTime<Utc> {
		*self.valid_until_rx.borrow()
	}

	/// Receiver notified whenever a refresh publishes a new validity deadline.
	///
	/// By the time a change is observable the registry already reflects the refresh.
	pub fn validity_changes(&self) -> watch::Receiver<DateTime<Utc>> {
		self.valid_until_rx.clone()
	}

	/// Registry this federation keeps aligned with the source's declared membership.
	pub fn registry(&self) -> &IdentityProviderRegistry {
		&self.inner.config.registry
	}

	/// Source URL this federation is bound to.
	pub fn metadata_url(&self) -> &Url {
		&self.inner.config.metadata_url
	}

	/// Run one refresh cycle immediately, serialized with the background schedule.
	pub async fn refresh_now(&self) -> Result<RegistryDelta> {
		self.inner.refresh_once(RefreshKind::Scheduled).await
	}

	/// Point-in-time status projection.
	pub fn status(&self) -> FederationStatus {
		let metrics = self.inner.metrics.snapshot();

		FederationStatus {
			metadata_url: self.inner.config.metadata_url.clone(),
			state: self.inner.state(),
			metadata_valid_until: self.metadata_valid_until(),
			last_refresh: *read_lock(&self.inner.last_refresh),
			provider_count: self.inner.config.registry.len(),
			consecutive_failures: self.inner.consecutive_failures.load(Ordering::Relaxed),
			refresh_successes: metrics.refresh_successes,
			refresh_errors: metrics.refresh_errors,
		}
	}

	/// Shut down the refresh schedule.
	///
	/// The pending timer is cancelled and no further fetches begin. An in-flight refresh, if
	/// any, completes as a single atomic publish. Dropping the federation has the same effect.
	pub fn dispose(&self) {
		let _ = self.shutdown.send(true);

		self.inner.set_state(FederationState::Disposed);
	}
}
impl Drop for Federation {
	fn drop(&mut self) {
		let _ = self.shutdown.send(true);
	}
}

#[derive(Debug)]
struct FederationInner {
	config: FederationConfig,
	client: Client,
	state: RwLock<FederationState>,
	valid_until: watch::Sender<DateTime<Utc>>,
	last_refresh: RwLock<Option<DateTime<Utc>>>,
	consecutive_failures: AtomicU32,
	single_flight: Mutex<()>,
	metrics: Arc<FederationMetrics>,
}
impl FederationInner {
	#[tracing::instrument(skip(self), fields(url = %self.config.metadata_url))]
	async fn refresh_once(&self, kind: RefreshKind) -> Result<RegistryDelta> {
		// One fetch per source at a time; the background loop and manual refreshes share this
		// guard.
		let _guard = self.single_flight.lock().await;

		if self.state() == FederationState::Disposed {
			return Err(Error::Disposed);
		}

		self.set_state_unless_disposed(match kind {
			RefreshKind::Initial => FederationState::Loading,
			RefreshKind::Scheduled => FederationState::Refreshing,
		});

		match self.execute_refresh().await {
			Ok(outcome) => {
				// Publish order: membership first, then the validity observable — a caller woken
				// by the validity change must already see the post-refresh registry.
				self.valid_until.send_replace(outcome.document.valid_until());
				*write_lock(&self.last_refresh) = Some(outcome.fetched_at);
				self.consecutive_failures.store(0, Ordering::Relaxed);
				self.set_state_unless_disposed(FederationState::Active);
				self.observe_success(&outcome);

				Ok(outcome.delta)
			},
			Err(err) => {
				self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
				self.observe_error();

				if !matches!(kind, RefreshKind::Initial) {
					// Last known good stays published.
					self.set_state_unless_disposed(FederationState::Active);
				}

				Err(err)
			},
		}
	}

	async fn execute_refresh(&self) -> Result<RefreshOutcome> {
		let started = Instant::now();
		let raw = fetch_metadata(&self.client, &self.config).await?;
		let fetched_at = Utc::now();
		let document = parser::parse(&raw, fetched_at, self.config.trust_validator.as_ref())?;
		let delta = self.config.registry.apply_document(&document);

		Ok(RefreshOutcome { document, delta, fetched_at, elapsed: started.elapsed() })
	}

	fn state(&self) -> FederationState {
		*read_lock(&self.state)
	}

	fn set_state(&self, state: FederationState) {
		*write_lock(&self.state) = state;
	}

	fn set_state_unless_disposed(&self, state: FederationState) {
		let mut guard = write_lock(&self.state);

		if *guard != FederationState::Disposed {
			*guard = state;
		}
	}

	fn observe_success(&self, outcome: &RefreshOutcome) {
		self.metrics.record_refresh_success(outcome.elapsed);

		#[cfg(feature = "metrics")]
		crate::metrics::record_refresh_success(
			self.config.metadata_url.as_str(),
			&outcome.delta,
			self.config.registry.len(),
			outcome.elapsed,
		);
	}

	fn observe_error(&self) {
		self.metrics.record_refresh_error();

		#[cfg(feature = "metrics")]
		crate::metrics::record_refresh_error(self.config.metadata_url.as_str());
	}
}

#[derive(Clone, Copy, Debug)]
enum RefreshKind {
	Initial,
	Scheduled,
}

#[derive(Debug)]
struct RefreshOutcome {
	document: MetadataDocument,
	delta: RegistryDelta,
	fetched_at: DateTime<Utc>,
	elapsed: Duration,
}

async fn run_refresh_loop(inner: Arc<FederationInner>, mut shutdown: watch::Receiver<bool>) {
	let mut delay = inner.config.scheduler.next_delay(*inner.valid_until.borrow(), Utc::now());

	loop {
		tokio::select! {
			changed = shutdown.changed() => {
				if changed.is_err() || *shutdown.borrow() {
					break;
				}
			},
			_ = time::sleep(delay) => {
				delay = match inner.refresh_once(RefreshKind::Scheduled).await {
					Ok(delta) => {
						let valid_until = *inner.valid_until.borrow();

						tracing::info!(
							url = %inner.config.metadata_url,
							added = delta.added.len(),
							removed = delta.removed.len(),
							retained = delta.retained.len(),
							valid_until = %valid_until,
							"federation metadata refreshed"
						);

						inner.config.scheduler.next_delay(valid_until, Utc::now())
					},
					Err(Error::Disposed) => break,
					Err(err) => {
						tracing::warn!(
							url = %inner.config.metadata_url,
							kind = %err.kind(),
							error = %err,
							"scheduled metadata refresh failed; retaining last known good trust set"
						);

						if let Some(observer) = &inner.config.failure_observer {
							observer.refresh_failed(&inner.config.metadata_url, &err);
						}

						inner.config.scheduler.retry_delay()
					},
				};
			},
		}
	}

	inner.set_state(FederationState::Disposed);
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
	lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
	lock.write().unwrap_or_else(PoisonError::into_inner)
}
