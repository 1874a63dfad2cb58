//! Credential engine integration tests

use chrono::{Duration, Utc};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ssopulse::aws::oidc::OidcClient;
use ssopulse::aws::portal::PortalClient;
use ssopulse::credentials::{CachedCredentials, CredentialEngine};
use ssopulse::errors::SsopulseError;
use ssopulse::token::cache::{credential_cache_key, format_timestamp, token_cache_key};
use ssopulse::token::{CachedToken, FileCache, NonInteractiveAuth, TokenEngine};

const START_URL: &str = "https://corp.awsapps.com/start";

fn fresh_token(dir: &TempDir) -> FileCache {
    let cache = FileCache::new(dir.path().join("sso"));
    let token = CachedToken {
        start_url: START_URL.to_string(),
        region: "us-east-1".to_string(),
        access_token: "access-token".to_string(),
        expires_at: format_timestamp(Utc::now() + Duration::hours(8)),
        received_at: None,
        client_id: None,
        client_secret: None,
        registration_expires_at: None,
        refresh_token: None,
        scopes: None,
    };
    cache.put(&token_cache_key(START_URL, None), &token).unwrap();
    cache
}

fn engines(dir: &TempDir, portal_endpoint: &str) -> (TokenEngine, CredentialEngine, FileCache) {
    let token_cache = fresh_token(dir);
    let token_engine = TokenEngine::new(
        OidcClient::new("us-east-1"),
        token_cache,
        Box::new(NonInteractiveAuth),
    );
    let credential_cache = FileCache::new(dir.path().join("cli"));
    let credential_engine = CredentialEngine::new(
        PortalClient::new("us-east-1").with_endpoint(portal_endpoint),
        credential_cache.clone(),
    );
    (token_engine, credential_engine, credential_cache)
}

#[tokio::test]
async fn test_fetch_and_cache_credentials() {
    let server = MockServer::start().await;

    let expiration_millis = (Utc::now() + Duration::hours(1)).timestamp_millis();
    Mock::given(method("GET"))
        .and(path("/federation/credentials"))
        .and(query_param("account_id", "123456789012"))
        .and(query_param("role_name", "Developer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "roleCredentials": {
                "accessKeyId": "ASIAEXAMPLE",
                "secretAccessKey": "secret",
                "sessionToken": "session",
                "expiration": expiration_millis,
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (token_engine, credential_engine, credential_cache) = engines(&dir, &server.uri());

    let credentials = credential_engine
        .get_credentials(&token_engine, START_URL, None, "123456789012", "Developer", false)
        .await
        .unwrap();

    assert_eq!(credentials.access_key_id, "ASIAEXAMPLE");
    assert!(credentials.expiration.ends_with('Z'));
    assert!(!credentials.expiration.contains("+00:00"));

    // Cached under the request fingerprint
    let key = credential_cache_key(START_URL, "Developer", "123456789012");
    let cached: CachedCredentials = credential_cache.get(&key).unwrap().unwrap();
    assert_eq!(cached.access_key_id, "ASIAEXAMPLE");

    // A second call is served from cache; expect(1) verifies no second hit
    let again = credential_engine
        .get_credentials(&token_engine, START_URL, None, "123456789012", "Developer", false)
        .await
        .unwrap();
    assert_eq!(again.access_key_id, "ASIAEXAMPLE");
}

#[tokio::test]
async fn test_account_id_is_normalized_before_fetch() {
    let server = MockServer::start().await;

    let expiration_millis = (Utc::now() + Duration::hours(1)).timestamp_millis();
    Mock::given(method("GET"))
        .and(path("/federation/credentials"))
        .and(query_param("account_id", "000000000123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "roleCredentials": {
                "accessKeyId": "ASIAEXAMPLE",
                "secretAccessKey": "secret",
                "sessionToken": "session",
                "expiration": expiration_millis,
            }
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (token_engine, credential_engine, _) = engines(&dir, &server.uri());

    credential_engine
        .get_credentials(&token_engine, START_URL, None, "123", "Developer", false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unauthorized_token_maps_to_login_required() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/federation/credentials"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "__type": "com.amazonaws.sso#UnauthorizedException",
            "message": "Session token not found or invalid",
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (token_engine, credential_engine, _) = engines(&dir, &server.uri());

    let err = credential_engine
        .get_credentials(&token_engine, START_URL, None, "123456789012", "Developer", false)
        .await
        .unwrap_err();
    assert!(matches!(err, SsopulseError::UnauthorizedSsoToken(_)));
}
