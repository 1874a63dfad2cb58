//! Role-credential engine
//!
//! Exchanges an access token for short-lived role credentials and caches
//! them on disk keyed by the request fingerprint. Cached records reuse the
//! credential-process wire shape so they can be printed as-is.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SsopulseError};
use crate::format::format_account_id;
use crate::token::cache::{credential_cache_key, parse_timestamp, FileCache};
use crate::token::TokenEngine;

use crate::aws::portal::PortalClient;

/// Minimum remaining validity before cached credentials are refetched;
/// matches the SDK's credential expiry window.
pub const CREDENTIAL_EXPIRY_WINDOW_SECS: i64 = 15 * 60;

/// Cached role credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CachedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// ISO-8601 with a literal `Z` suffix
    pub expiration: String,
}

/// Serialize an epoch-milliseconds expiration as ISO-8601 with `Z`.
fn format_expiration(epoch_millis: i64) -> Result<String> {
    DateTime::<Utc>::from_timestamp_millis(epoch_millis)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .ok_or_else(|| {
            SsopulseError::Format(format!("Invalid credential expiration {}", epoch_millis))
        })
}

/// Fetches and caches role credentials for one SSO region.
pub struct CredentialEngine {
    portal: PortalClient,
    cache: FileCache,
    expiry_window: Duration,
    now_fn: fn() -> DateTime<Utc>,
}

impl CredentialEngine {
    pub fn new(portal: PortalClient, cache: FileCache) -> Self {
        Self {
            portal,
            cache,
            expiry_window: Duration::seconds(CREDENTIAL_EXPIRY_WINDOW_SECS),
            now_fn: Utc::now,
        }
    }

    pub fn with_expiry_window(mut self, window: Duration) -> Self {
        self.expiry_window = window;
        self
    }

    pub fn with_now_fn(mut self, now_fn: fn() -> DateTime<Utc>) -> Self {
        self.now_fn = now_fn;
        self
    }

    fn is_fresh(&self, credentials: &CachedCredentials) -> bool {
        match parse_timestamp(&credentials.expiration) {
            Ok(expiry) => expiry - (self.now_fn)() > self.expiry_window,
            Err(_) => false,
        }
    }

    /// Return role credentials, from cache when still fresh.
    pub async fn get_credentials(
        &self,
        token_engine: &TokenEngine,
        start_url: &str,
        session_name: Option<&str>,
        account_id: &str,
        role_name: &str,
        force_refresh: bool,
    ) -> Result<CachedCredentials> {
        let account_id = format_account_id(account_id);
        let key = credential_cache_key(start_url, role_name, &account_id);

        if !force_refresh {
            if let Some(credentials) = self.cache.get::<CachedCredentials>(&key)? {
                if self.is_fresh(&credentials) {
                    tracing::debug!(account_id = %account_id, role_name, "Using cached credentials");
                    return Ok(credentials);
                }
            }
        }

        let token = token_engine
            .fetch_token(start_url, session_name, None, force_refresh)
            .await?;

        let role_credentials = self
            .portal
            .get_role_credentials(&token.access_token, &account_id, role_name)
            .await
            .map_err(|e| match e {
                SsopulseError::Service { code, message } if code == "UnauthorizedException" => {
                    SsopulseError::UnauthorizedSsoToken(message)
                }
                other => other,
            })?;

        let credentials = CachedCredentials {
            access_key_id: role_credentials.access_key_id,
            secret_access_key: role_credentials.secret_access_key,
            session_token: role_credentials.session_token,
            expiration: format_expiration(role_credentials.expiration)?,
        };

        self.cache.put(&key, &credentials)?;
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_expiration_uses_z_suffix() {
        let formatted = format_expiration(1700000000000).unwrap();
        assert!(formatted.ends_with('Z'));
        assert!(!formatted.contains("+00:00"));
        assert_eq!(formatted, "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_serialized_field_names() {
        let credentials = CachedCredentials {
            access_key_id: "ASIAEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: "2099-01-01T00:00:00Z".to_string(),
        };
        let value = serde_json::to_value(&credentials).unwrap();
        assert_eq!(value["AccessKeyId"], "ASIAEXAMPLE");
        assert_eq!(value["Expiration"], "2099-01-01T00:00:00Z");
    }

    #[test]
    fn test_freshness_window() {
        let dir = TempDir::new().unwrap();
        let engine = CredentialEngine::new(
            PortalClient::new("us-east-1"),
            FileCache::new(dir.path().to_path_buf()),
        );

        let fresh = CachedCredentials {
            access_key_id: "a".to_string(),
            secret_access_key: "s".to_string(),
            session_token: "t".to_string(),
            expiration: (Utc::now() + Duration::hours(1))
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string(),
        };
        assert!(engine.is_fresh(&fresh));

        let nearly_expired = CachedCredentials {
            expiration: (Utc::now() + Duration::minutes(5))
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string(),
            ..fresh.clone()
        };
        assert!(!engine.is_fresh(&nearly_expired));
    }
}
