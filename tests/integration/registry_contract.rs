//! HTTP contract of the blocking registry client against a mock server.

use std::time::Duration;

use plexlaunch::credentials::Secret;
use plexlaunch::registry::{AccessStatus, HfRegistry, RegistryClient, RegistryError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPO: &str = "nvidia/personaplex-7b-v1";
const PROBE_FILE: &str = "tokenizer_spm_32k_3.model";

fn client(server: &MockServer) -> HfRegistry {
    HfRegistry::new(server.uri(), Duration::from_secs(5))
}

async fn access_for(status: u16) -> Result<AccessStatus, RegistryError> {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(format!("/{REPO}/resolve/main/{PROBE_FILE}")))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;

    let registry = client(&server);
    tokio::task::spawn_blocking(move || {
        registry.check_access(REPO, PROBE_FILE, Some(&Secret::new("hf_probe")))
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn whoami_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/whoami-v2"))
        .and(header("Authorization", "Bearer hf_valid"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "name": "speech-tester", "type": "user" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let registry = client(&server);
    let name = tokio::task::spawn_blocking(move || registry.whoami(&Secret::new("hf_valid")))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(name, "speech-tester");
}

#[tokio::test]
async fn whoami_rejected_token_is_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/whoami-v2"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let registry = client(&server);
    let err = tokio::task::spawn_blocking(move || registry.whoami(&Secret::new("hf_revoked")))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, RegistryError::Status { status: 401 }));
}

#[tokio::test]
async fn whoami_malformed_body_is_json_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/whoami-v2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let registry = client(&server);
    let err = tokio::task::spawn_blocking(move || registry.whoami(&Secret::new("hf_valid")))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, RegistryError::Json(_)));
}

#[tokio::test]
async fn access_probe_maps_statuses() {
    assert_eq!(access_for(200).await.unwrap(), AccessStatus::Granted);
    assert_eq!(access_for(302).await.unwrap(), AccessStatus::Granted);
    assert_eq!(access_for(401).await.unwrap(), AccessStatus::Unauthenticated);
    assert_eq!(access_for(403).await.unwrap(), AccessStatus::LicenseRequired);
    assert_eq!(access_for(404).await.unwrap(), AccessStatus::NotFound);
    assert!(matches!(
        access_for(500).await,
        Err(RegistryError::Status { status: 500 })
    ));
}

#[test]
fn unreachable_registry_is_transport_error() {
    let registry = HfRegistry::new("http://127.0.0.1:9", Duration::from_millis(500));
    let err = registry.whoami(&Secret::new("hf_valid")).unwrap_err();
    assert!(matches!(err, RegistryError::Transport(_)));
}
