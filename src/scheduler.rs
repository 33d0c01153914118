//! Refresh scheduling policy.
//!
//! The scheduler is an explicit configuration value injected per federation instance — there is
//! no process-wide mutable state; tests construct their own instance with overridden intervals.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default floor between two refreshes of the same source.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(60);
/// Default ceiling on the delay to the next refresh.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24);
/// Default upper bound for the random scheduling lead.
pub const DEFAULT_REFRESH_JITTER: Duration = Duration::from_secs(5);

/// Refresh-delay policy for one federation instance.
///
/// A metadata producer that mistakenly or maliciously declares a very short cache duration must
/// not cause refresh storms against its source; `min_interval` is the floor protecting both the
/// source and local resources. `max_interval` caps how long a distant validity deadline is
/// trusted without revalidating.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshScheduler {
	/// Minimum delay between two fetches of the same source.
	pub min_interval: Duration,
	/// Maximum delay before the next fetch, regardless of declared validity.
	pub max_interval: Duration,
	/// Upper bound of the random lead subtracted from the computed delay.
	///
	/// Refreshes land slightly ahead of the validity deadline rather than after it; the lead
	/// never undercuts `min_interval`.
	#[serde(default)]
	pub jitter: Duration,
}
impl RefreshScheduler {
	/// Construct a scheduler with the documented defaults.
	pub fn new() -> Self {
		Self::default()
	}

	/// Override the throttling floor.
	pub fn with_min_interval(mut self, value: Duration) -> Self {
		self.min_interval = value;

		self
	}

	/// Override the delay ceiling.
	pub fn with_max_interval(mut self, value: Duration) -> Self {
		self.max_interval = value;

		self
	}

	/// Override the scheduling jitter.
	pub fn with_jitter(mut self, value: Duration) -> Self {
		self.jitter = value;

		self
	}

	/// Validate invariants for the scheduling policy.
	pub fn validate(&self) -> Result<()> {
		if self.min_interval.is_zero() {
			return Err(Error::Configuration {
				field: "scheduler.min_interval",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_interval < self.min_interval {
			return Err(Error::Configuration {
				field: "scheduler.max_interval",
				reason: "Must be greater than or equal to min_interval.".into(),
			});
		}

		Ok(())
	}

	/// Delay until the next refresh of a document valid until `valid_until`.
	///
	/// `valid_until - now`, floored at `min_interval` and capped at `max_interval`, minus a
	/// random lead.
	pub fn next_delay(&self, valid_until: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
		let until_deadline = (valid_until - now).to_std().unwrap_or(Duration::ZERO);
		let bounded = until_deadline.clamp(self.min_interval, self.max_interval);

		bounded.saturating_sub(self.random_lead()).max(self.min_interval)
	}

	/// Delay before the next attempt after a failed refresh.
	pub fn retry_delay(&self) -> Duration {
		self.min_interval.saturating_add(self.random_lead())
	}

	fn random_lead(&self) -> Duration {
		if self.jitter.is_zero() {
			return Duration::ZERO;
		}

		SMALL_RNG.with(|cell| {
			let mut rng = cell.borrow_mut();

			Duration::from_secs_f64(rng.random_range(0.0..=self.jitter.as_secs_f64()))
		})
	}
}
impl Default for RefreshScheduler {
	fn default() -> Self {
		Self {
			min_interval: DEFAULT_MIN_INTERVAL,
			max_interval: DEFAULT_MAX_INTERVAL,
			jitter: DEFAULT_REFRESH_JITTER,
		}
	}
}
