//! Integration tests for initial metadata loading and scheduled background refresh.

// std
use std::{
	collections::BTreeSet,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use chrono::{DateTime, TimeDelta, Utc};
use federation_cache::{
	EntityId, Error, Federation, FederationConfig, FederationState, IdentityProviderRegistry,
	RefreshScheduler, Result, UnverifiedTrust,
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

const METADATA_PATH: &str = "/federationMetadata";

const IDP_1: &str = "http://idp1.federation.example.com/metadata";
const IDP_2: &str = "http://idp2.federation.example.com/metadata";
const IDP_3: &str = "http://idp3.federation.example.com/metadata";

fn metadata_body(validity: &str, entity_ids: &[&str], want_signed: bool) -> String {
	let providers: Vec<_> = entity_ids
		.iter()
		.map(|id| {
			serde_json::json!({
				"entityId": id,
				"singleSignOnServices": [{
					"binding": "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect",
					"location": format!("{id}/sso"),
				}],
				"wantAuthnRequestsSigned": want_signed,
			})
		})
		.collect();
	let mut body = serde_json::json!({
		"name": "example-federation",
		"identityProviders": providers,
	});

	if let Some(instant) = validity.strip_prefix("validUntil:") {
		body["validUntil"] = instant.into();
	} else {
		body["cacheDuration"] = validity.into();
	}

	serde_json::to_string(&body).expect("metadata body")
}

fn metadata_response(body: String) -> ResponseTemplate {
	ResponseTemplate::new(200)
		.set_body_string(body)
		.insert_header("content-type", "application/json")
}

fn test_config(server: &MockServer, registry: IdentityProviderRegistry) -> FederationConfig {
	FederationConfig::new(
		format!("{}{METADATA_PATH}", server.uri()),
		registry,
		Arc::new(UnverifiedTrust),
	)
	.expect("config")
	.with_require_https(false)
}

fn fast_scheduler() -> RefreshScheduler {
	RefreshScheduler::new()
		.with_min_interval(Duration::from_millis(25))
		.with_jitter(Duration::ZERO)
}

fn key_set(registry: &IdentityProviderRegistry) -> BTreeSet<String> {
	registry.entity_ids().iter().map(|id| id.as_str().to_string()).collect()
}

#[tokio::test]
async fn initial_load_populates_registry_and_absolute_validity() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(METADATA_PATH))
		.respond_with(metadata_response(metadata_body(
			"validUntil:2100-01-01T14:43:15Z",
			&[IDP_1, IDP_2],
			false,
		)))
		.expect(1)
		.mount(&server)
		.await;

	let registry = IdentityProviderRegistry::new();
	let federation = Federation::bind(test_config(&server, registry.clone())).await?;

	assert!(registry.contains(&EntityId::new(IDP_1)));
	assert!(registry.contains(&EntityId::new(IDP_2)));
	assert_eq!(registry.len(), 2);
	assert_eq!(
		federation.metadata_valid_until(),
		"2100-01-01T14:43:15Z".parse::<DateTime<Utc>>().expect("timestamp")
	);

	let provider = registry.get(&EntityId::new(IDP_1)).expect("idp1");

	assert_eq!(provider.single_sign_on_services().len(), 1);
	assert_eq!(federation.status().state, FederationState::Active);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn cache_duration_validity_is_relative_to_fetch_time() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(METADATA_PATH))
		.respond_with(metadata_response(metadata_body("PT2H", &[IDP_1], false)))
		.expect(1)
		.mount(&server)
		.await;

	let federation =
		Federation::bind(test_config(&server, IdentityProviderRegistry::new())).await?;
	let expected = Utc::now() + TimeDelta::hours(2);
	let drift = (federation.metadata_valid_until() - expected).abs();

	assert!(drift < TimeDelta::seconds(5), "validity drifted by {drift}");

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn invalid_configuration_fails_before_any_network_call() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

	let registry = IdentityProviderRegistry::new();

	// The mock server only speaks plain HTTP; the default HTTPS requirement must reject it
	// during validation.
	let insecure = FederationConfig::new(
		format!("{}{METADATA_PATH}", server.uri()),
		registry.clone(),
		Arc::new(UnverifiedTrust),
	)?;

	assert!(matches!(Federation::bind(insecure).await.unwrap_err(), Error::Security(_)));

	let outside_allowlist = test_config(&server, registry.clone())
		.with_allowed_domains(["trusted.example.com"]);

	assert!(matches!(Federation::bind(outside_allowlist).await.unwrap_err(), Error::Security(_)));

	let unschedulable = test_config(&server, registry.clone())
		.with_scheduler(RefreshScheduler::new().with_min_interval(Duration::ZERO));

	assert!(matches!(
		Federation::bind(unschedulable).await.unwrap_err(),
		Error::Configuration { .. }
	));

	assert!(registry.is_empty());

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn scheduled_refresh_updates_validity_within_bounded_wait() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(METADATA_PATH))
		.respond_with(metadata_response(metadata_body("PT0S", &[IDP_1], false)))
		.expect(2..)
		.mount(&server)
		.await;

	let federation = Federation::bind(
		test_config(&server, IdentityProviderRegistry::new()).with_scheduler(fast_scheduler()),
	)
	.await?;
	let initial = federation.metadata_valid_until();
	let mut changes = federation.validity_changes();

	tokio::time::timeout(Duration::from_secs(5), changes.changed())
		.await
		.expect("background refresh within bound")
		.expect("validity channel open");

	assert!(federation.metadata_valid_until() > initial);

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn refresh_adds_new_providers_and_removes_absent_ones() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let requests = Arc::new(AtomicUsize::new(0));
	let counter = requests.clone();

	Mock::given(method("GET"))
		.and(path(METADATA_PATH))
		.respond_with(move |_: &wiremock::Request| {
			let first = counter.fetch_add(1, Ordering::SeqCst) == 0;

			if first {
				metadata_response(metadata_body("PT0S", &[IDP_1, IDP_2], false))
			} else {
				metadata_response(metadata_body("PT0S", &[IDP_1, IDP_3], true))
			}
		})
		.mount(&server)
		.await;

	let registry = IdentityProviderRegistry::new();
	let federation = Federation::bind(
		test_config(&server, registry.clone()).with_scheduler(fast_scheduler()),
	)
	.await?;

	assert_eq!(key_set(&registry), BTreeSet::from([IDP_1.to_string(), IDP_2.to_string()]));
	assert!(!registry.get(&EntityId::new(IDP_1)).expect("idp1").want_authn_requests_signed());

	let mut changes = federation.validity_changes();

	tokio::time::timeout(Duration::from_secs(5), changes.changed())
		.await
		.expect("background refresh within bound")
		.expect("validity channel open");

	assert_eq!(key_set(&registry), BTreeSet::from([IDP_1.to_string(), IDP_3.to_string()]));
	// Retained participant got its record replaced, not merged.
	assert!(registry.get(&EntityId::new(IDP_1)).expect("idp1").want_authn_requests_signed());
	assert!(registry.get(&EntityId::new(IDP_2)).is_none());

	Ok(())
}

#[tokio::test]
async fn dispose_stops_the_refresh_schedule() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let requests = Arc::new(AtomicUsize::new(0));
	let counter = requests.clone();

	Mock::given(method("GET"))
		.and(path(METADATA_PATH))
		.respond_with(move |_: &wiremock::Request| {
			counter.fetch_add(1, Ordering::SeqCst);

			metadata_response(metadata_body("PT0S", &[IDP_1], false))
		})
		.mount(&server)
		.await;

	let registry = IdentityProviderRegistry::new();
	let federation = Federation::bind(
		test_config(&server, registry.clone()).with_scheduler(fast_scheduler()),
	)
	.await?;
	let mut changes = federation.validity_changes();

	tokio::time::timeout(Duration::from_secs(5), changes.changed())
		.await
		.expect("background refresh within bound")
		.expect("validity channel open");

	federation.dispose();

	assert!(matches!(federation.refresh_now().await.unwrap_err(), Error::Disposed));
	assert_eq!(federation.status().state, FederationState::Disposed);

	// Let any in-flight cycle settle, then confirm the schedule is gone.
	tokio::time::sleep(Duration::from_millis(100)).await;

	let settled = requests.load(Ordering::SeqCst);

	tokio::time::sleep(Duration::from_millis(250)).await;

	assert_eq!(requests.load(Ordering::SeqCst), settled, "fetches continued after disposal");
	// The last published trust set stays available after teardown.
	assert!(registry.contains(&EntityId::new(IDP_1)));

	Ok(())
}
