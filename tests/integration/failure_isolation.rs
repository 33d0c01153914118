//! Integration tests proving failed refreshes never corrupt or freeze the trust set.

// std
use std::{
	collections::BTreeSet,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use federation_cache::{
	DocumentSignature, EntityId, Error, ErrorKind, FailureObserver, Federation, FederationConfig,
	FederationState, IdentityProviderRegistry, MetadataDocument, RefreshScheduler, Result,
	TrustValidator, UnverifiedTrust,
};
use url::Url;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

const METADATA_PATH: &str = "/federationMetadata";

const IDP_1: &str = "http://idp1.federation.example.com/metadata";
const IDP_3: &str = "http://idp3.federation.example.com/metadata";

#[derive(Debug, Default)]
struct RecordingObserver {
	failures: Mutex<Vec<ErrorKind>>,
}
impl RecordingObserver {
	fn kinds(&self) -> Vec<ErrorKind> {
		self.failures.lock().expect("observer lock").clone()
	}
}
impl FailureObserver for RecordingObserver {
	fn refresh_failed(&self, _: &Url, error: &Error) {
		self.failures.lock().expect("observer lock").push(error.kind());
	}
}

fn metadata_body(entity_ids: &[&str]) -> String {
	let providers: Vec<_> =
		entity_ids.iter().map(|id| serde_json::json!({ "entityId": id })).collect();
	let body = serde_json::json!({
		"cacheDuration": "PT0S",
		"identityProviders": providers,
	});

	serde_json::to_string(&body).expect("metadata body")
}

fn metadata_response(body: String) -> ResponseTemplate {
	ResponseTemplate::new(200)
		.set_body_string(body)
		.insert_header("content-type", "application/json")
}

fn fast_scheduler() -> RefreshScheduler {
	RefreshScheduler::new()
		.with_min_interval(Duration::from_millis(25))
		.with_jitter(Duration::ZERO)
}

fn test_config(
	server: &MockServer,
	registry: IdentityProviderRegistry,
	observer: Arc<RecordingObserver>,
) -> FederationConfig {
	FederationConfig::new(
		format!("{}{METADATA_PATH}", server.uri()),
		registry,
		Arc::new(UnverifiedTrust),
	)
	.expect("config")
	.with_require_https(false)
	.with_scheduler(fast_scheduler())
	.with_failure_observer(observer)
}

fn key_set(registry: &IdentityProviderRegistry) -> BTreeSet<String> {
	registry.entity_ids().iter().map(|id| id.as_str().to_string()).collect()
}

#[tokio::test]
async fn failed_refreshes_retain_last_known_good_state() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let requests = Arc::new(AtomicUsize::new(0));
	let counter = requests.clone();

	Mock::given(method("GET"))
		.and(path(METADATA_PATH))
		.respond_with(move |_: &wiremock::Request| {
			if counter.fetch_add(1, Ordering::SeqCst) == 0 {
				metadata_response(metadata_body(&[IDP_1]))
			} else {
				ResponseTemplate::new(500).set_body_string("upstream outage")
			}
		})
		.mount(&server)
		.await;

	let registry = IdentityProviderRegistry::new();
	let observer = Arc::new(RecordingObserver::default());
	let federation =
		Federation::bind(test_config(&server, registry.clone(), observer.clone())).await?;
	let initial_validity = federation.metadata_valid_until();
	let initial_keys = key_set(&registry);

	// Several retry cycles' worth of outage.
	tokio::time::sleep(Duration::from_millis(300)).await;

	assert_eq!(key_set(&registry), initial_keys);
	assert_eq!(federation.metadata_valid_until(), initial_validity);
	assert!(matches!(
		federation.status().state,
		FederationState::Active | FederationState::Refreshing
	));
	assert!(federation.status().consecutive_failures >= 1);

	let kinds = observer.kinds();

	assert!(!kinds.is_empty());
	assert!(kinds.iter().all(|kind| *kind == ErrorKind::Fetch));

	// The loop keeps scheduling retries rather than terminating.
	let failures_so_far = kinds.len();

	tokio::time::sleep(Duration::from_millis(150)).await;

	assert!(observer.kinds().len() > failures_so_far, "refresh loop stopped retrying");

	Ok(())
}

#[tokio::test]
async fn refresh_loop_recovers_once_the_source_heals() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let requests = Arc::new(AtomicUsize::new(0));
	let counter = requests.clone();

	Mock::given(method("GET"))
		.and(path(METADATA_PATH))
		.respond_with(move |_: &wiremock::Request| match counter.fetch_add(1, Ordering::SeqCst) {
			0 => metadata_response(metadata_body(&[IDP_1])),
			1 | 2 => ResponseTemplate::new(503).set_body_string("maintenance"),
			_ => metadata_response(metadata_body(&[IDP_1, IDP_3])),
		})
		.mount(&server)
		.await;

	let registry = IdentityProviderRegistry::new();
	let observer = Arc::new(RecordingObserver::default());
	let federation =
		Federation::bind(test_config(&server, registry.clone(), observer.clone())).await?;
	let mut changes = federation.validity_changes();

	tokio::time::timeout(Duration::from_secs(5), changes.changed())
		.await
		.expect("recovery within bound")
		.expect("validity channel open");

	assert_eq!(key_set(&registry), BTreeSet::from([IDP_1.to_string(), IDP_3.to_string()]));
	assert!(!observer.kinds().is_empty(), "outage cycles were not reported");

	Ok(())
}

#[tokio::test]
async fn trust_rejection_is_contained_like_any_parse_failure() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	#[derive(Debug, Default)]
	struct AcceptFirst {
		calls: AtomicUsize,
	}
	impl TrustValidator for AcceptFirst {
		fn verify(
			&self,
			_: &MetadataDocument,
			_: Option<&DocumentSignature>,
		) -> std::result::Result<(), String> {
			if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
				Ok(())
			} else {
				Err("signing key no longer trusted".into())
			}
		}
	}

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(METADATA_PATH))
		.respond_with(metadata_response(metadata_body(&[IDP_1])))
		.mount(&server)
		.await;

	let registry = IdentityProviderRegistry::new();
	let observer = Arc::new(RecordingObserver::default());
	let config = FederationConfig::new(
		format!("{}{METADATA_PATH}", server.uri()),
		registry.clone(),
		Arc::new(AcceptFirst::default()),
	)?
	.with_require_https(false)
	.with_scheduler(fast_scheduler())
	.with_failure_observer(observer.clone());
	let federation = Federation::bind(config).await?;
	let initial_validity = federation.metadata_valid_until();

	tokio::time::sleep(Duration::from_millis(300)).await;

	assert!(registry.contains(&EntityId::new(IDP_1)));
	assert_eq!(federation.metadata_valid_until(), initial_validity);

	let kinds = observer.kinds();

	assert!(!kinds.is_empty());
	assert!(kinds.iter().all(|kind| *kind == ErrorKind::Trust));

	Ok(())
}
