//! Telemetry for refresh outcomes and registry membership.
//!
//! A per-federation atomic accumulator feeds the status projection unconditionally; exporting
//! to the `metrics` ecosystem is feature-gated.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
#[cfg(feature = "metrics")] use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")] use smallvec::SmallVec;
// self
use crate::_prelude::*;
#[cfg(feature = "metrics")] use crate::registry::RegistryDelta;

#[cfg(feature = "metrics")] type LabelSet = SmallVec<[Label; 2]>;

#[cfg(feature = "metrics")]
const METRIC_REFRESH_TOTAL: &str = "federation_metadata_refresh_total";
#[cfg(feature = "metrics")]
const METRIC_REFRESH_DURATION: &str = "federation_metadata_refresh_duration_seconds";
#[cfg(feature = "metrics")]
const METRIC_REFRESH_ERRORS: &str = "federation_metadata_refresh_errors_total";
#[cfg(feature = "metrics")]
const METRIC_PROVIDERS_ADDED: &str = "federation_registry_providers_added_total";
#[cfg(feature = "metrics")]
const METRIC_PROVIDERS_REMOVED: &str = "federation_registry_providers_removed_total";
#[cfg(feature = "metrics")]
const METRIC_REGISTRY_PROVIDERS: &str = "federation_registry_providers";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe refresh counters for a single federation.
#[derive(Debug, Default)]
pub struct FederationMetrics {
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl FederationMetrics {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a successful refresh and its latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros.store(duration.as_micros() as u64, Ordering::Relaxed);
	}

	/// Record a failed refresh attempt.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> FederationMetricsSnapshot {
		FederationMetricsSnapshot {
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-federation refresh counters.
#[derive(Clone, Debug)]
pub struct FederationMetricsSnapshot {
	/// Count of successful refresh operations, including the initial load.
	pub refresh_successes: u64,
	/// Count of refresh attempts that resulted in errors.
	pub refresh_errors: u64,
	/// Microsecond latency of the most recent successful refresh.
	pub last_refresh_micros: Option<u64>,
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a successful refresh with its membership delta and resulting registry size.
#[cfg(feature = "metrics")]
pub fn record_refresh_success(
	source: &str,
	delta: &RegistryDelta,
	registry_size: usize,
	duration: Duration,
) {
	let labels = base_labels(source);

	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(source, "success").iter()).increment(1);
	metrics::histogram!(METRIC_REFRESH_DURATION, labels.iter()).record(duration.as_secs_f64());

	if !delta.added.is_empty() {
		metrics::counter!(METRIC_PROVIDERS_ADDED, labels.iter())
			.increment(delta.added.len() as u64);
	}
	if !delta.removed.is_empty() {
		metrics::counter!(METRIC_PROVIDERS_REMOVED, labels.iter())
			.increment(delta.removed.len() as u64);
	}

	metrics::gauge!(METRIC_REGISTRY_PROVIDERS, labels.iter()).set(registry_size as f64);
}

/// Record a failed refresh attempt.
#[cfg(feature = "metrics")]
pub fn record_refresh_error(source: &str) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(source, "error").iter()).increment(1);
	metrics::counter!(METRIC_REFRESH_ERRORS, base_labels(source).iter()).increment(1);
}

#[cfg(feature = "metrics")]
fn base_labels(source: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("source", source.to_owned()));

	labels
}

#[cfg(feature = "metrics")]
fn status_labels(source: &str, status: &'static str) -> LabelSet {
	let mut labels = base_labels(source);

	labels.push(Label::new("status", status));

	labels
}
