//! REST credential issuer integration

mod harness;

use encore_live_rooms::{
    ConnectionStatus, CredentialRequest, CredentialRole, CredentialSource, HttpCredentialSource,
    LiveClient, LiveClientConfig, NullTrackSink, SampleCaptureBackend, TokenManager,
};
use harness::{init_logging, wait_until, MockCredentialIssuer, MockSignalingServer};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_http_source_sends_role_and_bearer() {
    init_logging();
    let issuer = MockCredentialIssuer::start(7200).await;
    let source = HttpCredentialSource::new(issuer.endpoint(), Some("session-abc".to_string()));

    let credential = source
        .fetch(&CredentialRequest {
            role: CredentialRole::Host,
            channel_name: Some("artist_42".to_string()),
        })
        .await
        .expect("fetch failed");

    assert_eq!(credential.token, "issued-1");
    assert!(credential.remaining() > Duration::from_secs(7000));

    let requests = issuer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.as_deref(), Some("Bearer session-abc"));
    assert_eq!(requests[0].1["role"], "host");
    assert_eq!(requests[0].1["channelName"], "artist_42");
}

#[tokio::test]
async fn test_token_manager_caches_issued_credential() {
    init_logging();
    let issuer = MockCredentialIssuer::start(7200).await;
    let manager = TokenManager::new(
        Arc::new(HttpCredentialSource::new(issuer.endpoint(), None)),
        CredentialRequest {
            role: CredentialRole::Audience,
            channel_name: None,
        },
        Duration::from_secs(1800),
    );

    let first = manager.get_credential().await.unwrap();
    let second = manager.get_credential().await.unwrap();
    assert_eq!(first.token, second.token);
    assert_eq!(issuer.requests().len(), 1);
    assert!(issuer.requests()[0].0.is_none());

    manager.invalidate().await;
    assert_eq!(manager.get_credential().await.unwrap().token, "issued-2");
}

#[tokio::test]
async fn test_client_connects_with_issued_token() {
    init_logging();
    let issuer = MockCredentialIssuer::start(7200).await;
    let server = MockSignalingServer::start().await;

    let config = LiveClientConfig {
        signaling_url: server.url(),
        token_endpoint: issuer.endpoint(),
        stun_servers: Vec::new(),
        ..Default::default()
    };
    let client = LiveClient::start(
        config.clone(),
        Arc::new(HttpCredentialSource::new(config.token_endpoint, None)),
        Arc::new(SampleCaptureBackend::new()),
        Arc::new(NullTrackSink),
    )
    .await
    .expect("Failed to start live client");

    assert!(
        wait_until(Duration::from_secs(10), || client.status() == ConnectionStatus::Open).await,
        "Client never connected"
    );
    assert_eq!(server.tokens(), vec![Some("issued-1".to_string())]);

    client.shutdown().await;
    assert_eq!(client.status(), ConnectionStatus::Closed);
}
