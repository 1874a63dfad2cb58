//! Token engine integration tests
//!
//! Drives the device-authorization flow against a mock OIDC endpoint.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ssopulse::aws::oidc::OidcClient;
use ssopulse::errors::{Result, SsopulseError};
use ssopulse::token::cache::{format_timestamp, token_cache_key};
use ssopulse::token::engine::Sleeper;
use ssopulse::token::{
    CachedToken, FileCache, NonInteractiveAuth, OnPendingAuthorization, PendingAuthorization,
    TokenEngine,
};

#[derive(Clone, Default)]
struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, seconds: u64) {
        self.sleeps.lock().unwrap().push(seconds);
    }
}

#[derive(Clone, Default)]
struct RecordingAuth {
    user_codes: Arc<Mutex<Vec<String>>>,
}

impl OnPendingAuthorization for RecordingAuth {
    fn on_pending(&self, authorization: &PendingAuthorization) -> Result<()> {
        self.user_codes
            .lock()
            .unwrap()
            .push(authorization.user_code.clone());
        Ok(())
    }
}

const START_URL: &str = "https://corp.awsapps.com/start";

fn seeded_token(refresh_token: Option<&str>, expires_in_minutes: i64) -> CachedToken {
    CachedToken {
        start_url: START_URL.to_string(),
        region: "us-east-1".to_string(),
        access_token: "old-token".to_string(),
        expires_at: format_timestamp(Utc::now() + Duration::minutes(expires_in_minutes)),
        received_at: Some(format_timestamp(Utc::now() - Duration::hours(1))),
        client_id: Some("client-id".to_string()),
        client_secret: Some("client-secret".to_string()),
        registration_expires_at: Some(format_timestamp(Utc::now() + Duration::days(30))),
        refresh_token: refresh_token.map(str::to_string),
        scopes: None,
    }
}

#[tokio::test]
async fn test_fresh_cached_token_is_returned_without_any_call() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache = FileCache::new(dir.path().to_path_buf());

    let token = seeded_token(None, 60);
    cache.put(&token_cache_key(START_URL, None), &token).unwrap();

    let engine = TokenEngine::new(
        OidcClient::new("us-east-1").with_endpoint(&server.uri()),
        cache,
        Box::new(NonInteractiveAuth),
    );

    let fetched = engine.fetch_token(START_URL, None, None, false).await.unwrap();
    assert_eq!(fetched.access_token, "old-token");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_token_refreshes_without_device_flow() {
    let server = MockServer::start().await;

    // The refresh grant succeeds; the device flow must never start
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_partial_json(serde_json::json!({
            "grantType": "refresh_token",
            "refreshToken": "refresh-me",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "refreshed-token",
            "expiresIn": 28800,
            "refreshToken": "next-refresh",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/device_authorization"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = FileCache::new(dir.path().to_path_buf());
    let key = token_cache_key(START_URL, None);
    // Expired (within the 15-minute window) but refreshable
    cache.put(&key, &seeded_token(Some("refresh-me"), 5)).unwrap();

    let engine = TokenEngine::new(
        OidcClient::new("us-east-1").with_endpoint(&server.uri()),
        cache.clone(),
        // Would fail the flow if it ever reached the prompt
        Box::new(NonInteractiveAuth),
    );

    let token = engine.fetch_token(START_URL, None, None, false).await.unwrap();
    assert_eq!(token.access_token, "refreshed-token");
    assert_eq!(token.refresh_token.as_deref(), Some("next-refresh"));

    // The cache now holds the refreshed token
    let cached: CachedToken = cache.get(&key).unwrap().unwrap();
    assert_eq!(cached.access_token, "refreshed-token");
}

#[tokio::test]
async fn test_polling_with_slow_down() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/client/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "clientId": "registered-client",
            "clientSecret": "registered-secret",
            "clientSecretExpiresAt": (Utc::now() + Duration::days(90)).timestamp(),
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/device_authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "deviceCode": "D",
            "userCode": "UC-CODE",
            "verificationUri": "https://device.sso.us-east-1.amazonaws.com/",
            "verificationUriComplete": "https://device.sso.us-east-1.amazonaws.com/?user_code=UC-CODE",
            "expiresIn": 600,
            "interval": 5,
        })))
        .expect(1)
        .mount(&server)
        .await;

    // First attempt pending, second slow-down, third success
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "authorization_pending",
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "slow_down",
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "new-token",
            "expiresIn": 28800,
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = FileCache::new(dir.path().to_path_buf());

    let sleeper = RecordingSleeper::default();
    let auth = RecordingAuth::default();

    let engine = TokenEngine::new(
        OidcClient::new("us-east-1").with_endpoint(&server.uri()),
        cache.clone(),
        Box::new(auth.clone()),
    )
    .with_sleeper(Box::new(sleeper.clone()));

    let token = engine.fetch_token(START_URL, None, None, false).await.unwrap();
    assert_eq!(token.access_token, "new-token");
    assert_eq!(token.client_id.as_deref(), Some("registered-client"));

    // The slow-down added 5 seconds to the second sleep
    assert_eq!(*sleeper.sleeps.lock().unwrap(), vec![5, 10]);
    assert_eq!(*auth.user_codes.lock().unwrap(), vec!["UC-CODE".to_string()]);

    // The token landed in the cache
    let cached: CachedToken = cache.get(&token_cache_key(START_URL, None)).unwrap().unwrap();
    assert_eq!(cached.access_token, "new-token");
}

#[tokio::test]
async fn test_registration_is_reused_across_fetches() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/client/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "clientId": "registered-client",
            "clientSecret": "registered-secret",
            "clientSecretExpiresAt": (Utc::now() + Duration::days(90)).timestamp(),
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/device_authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "deviceCode": "D",
            "userCode": "UC",
            "verificationUri": "https://u",
            "verificationUriComplete": "https://u?UC",
            "expiresIn": 600,
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "tok",
            "expiresIn": 28800,
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = FileCache::new(dir.path().to_path_buf());
    let engine = TokenEngine::new(
        OidcClient::new("us-east-1").with_endpoint(&server.uri()),
        cache,
        Box::new(RecordingAuth::default()),
    )
    .with_sleeper(Box::new(RecordingSleeper::default()));

    engine.fetch_token(START_URL, None, None, false).await.unwrap();
    // The second fetch forces a refresh but reuses the registration
    engine.fetch_token(START_URL, None, None, true).await.unwrap();
}

#[tokio::test]
async fn test_non_interactive_short_circuits_poll() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/client/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "clientId": "registered-client",
            "clientSecret": "registered-secret",
            "clientSecretExpiresAt": (Utc::now() + Duration::days(90)).timestamp(),
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/device_authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "deviceCode": "D",
            "userCode": "UC",
            "verificationUri": "https://u",
            "verificationUriComplete": "https://u?UC",
            "expiresIn": 600,
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "authorization_pending",
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = TokenEngine::new(
        OidcClient::new("us-east-1").with_endpoint(&server.uri()),
        FileCache::new(dir.path().to_path_buf()),
        Box::new(NonInteractiveAuth),
    );

    let err = engine.fetch_token(START_URL, None, None, false).await.unwrap_err();
    assert!(matches!(err, SsopulseError::AuthenticationNeeded));
}

#[tokio::test]
async fn test_expired_device_window_is_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/client/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "clientId": "c",
            "clientSecret": "s",
            "clientSecretExpiresAt": (Utc::now() + Duration::days(90)).timestamp(),
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/device_authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "deviceCode": "D",
            "userCode": "UC",
            "verificationUri": "https://u",
            "verificationUriComplete": "https://u?UC",
            "expiresIn": 600,
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "expired_token",
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let engine = TokenEngine::new(
        OidcClient::new("us-east-1").with_endpoint(&server.uri()),
        FileCache::new(dir.path().to_path_buf()),
        Box::new(NonInteractiveAuth),
    );

    let err = engine.fetch_token(START_URL, None, None, false).await.unwrap_err();
    assert!(matches!(err, SsopulseError::PendingAuthorizationExpired));
}
