//! Device-authorization token engine
//!
//! One `fetch_token` call works through: cache read, refresh attempt when a
//! refresh token and live registration are available, client registration
//! (cached separately, registrations outlive tokens), device authorization,
//! one pre-prompt token attempt, the pending-authorization callback, and
//! the RFC 8628 poll loop with slow-down handling.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::aws::oidc::{
    CreateTokenRequest, CreateTokenResponse, OidcClient, DEVICE_CODE_GRANT_TYPE,
    REFRESH_TOKEN_GRANT_TYPE,
};
use crate::errors::{Result, SsopulseError};
use crate::token::browser::{OnPendingAuthorization, PendingAuthorization};
use crate::token::cache::{
    format_timestamp, parse_timestamp, registration_cache_key, token_cache_key, CachedRegistration,
    CachedToken, FileCache,
};

/// Default minimum remaining validity before a token counts as expired
pub const DEFAULT_EXPIRY_WINDOW_SECS: i64 = 15 * 60;

/// The device flow RFC defines the slow-down delay as an extra 5 seconds
const SLOW_DOWN_DELAY_SECS: u64 = 5;
const DEFAULT_INTERVAL_SECS: u64 = 5;

const TOOL_NAME: &str = "ssopulse";

/// Sleep hook so tests can observe the poll cadence
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, seconds: u64);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, seconds: u64) {
        tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
    }
}

/// Obtains and caches access tokens for one SSO region.
pub struct TokenEngine {
    oidc: OidcClient,
    cache: FileCache,
    on_pending_authorization: Box<dyn OnPendingAuthorization>,
    expiry_window: Duration,
    sleeper: Box<dyn Sleeper>,
    now_fn: fn() -> DateTime<Utc>,
}

impl TokenEngine {
    pub fn new(
        oidc: OidcClient,
        cache: FileCache,
        on_pending_authorization: Box<dyn OnPendingAuthorization>,
    ) -> Self {
        Self {
            oidc,
            cache,
            on_pending_authorization,
            expiry_window: Duration::seconds(DEFAULT_EXPIRY_WINDOW_SECS),
            sleeper: Box::new(TokioSleeper),
            now_fn: Utc::now,
        }
    }

    pub fn with_expiry_window(mut self, window: Duration) -> Self {
        self.expiry_window = window;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_now_fn(mut self, now_fn: fn() -> DateTime<Utc>) -> Self {
        self.now_fn = now_fn;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_fn)()
    }

    /// A record is expired once its remaining validity drops below the window.
    /// Unparseable timestamps count as expired.
    fn is_expired(&self, expires_at: &str) -> bool {
        match parse_timestamp(expires_at) {
            Ok(expiry) => expiry - self.now() < self.expiry_window,
            Err(_) => true,
        }
    }

    /// Fetch a token for the session, from cache or via the device flow.
    pub async fn fetch_token(
        &self,
        start_url: &str,
        session_name: Option<&str>,
        scopes: Option<&[String]>,
        force_refresh: bool,
    ) -> Result<CachedToken> {
        let key = token_cache_key(start_url, session_name);

        if !force_refresh {
            if let Some(token) = self.cache.get::<CachedToken>(&key)? {
                if !self.is_expired(&token.expires_at) {
                    tracing::debug!(start_url, "Using cached token");
                    return Ok(token);
                }
                if let Some(new_token) = self.refresh(&token).await {
                    tracing::info!(start_url, "Token refresh succeeded");
                    self.cache.put(&key, &new_token)?;
                    return Ok(new_token);
                }
            }
        }

        let registration = self.registration(start_url, session_name, scopes).await?;
        let token = self
            .device_flow(start_url, scopes, &registration)
            .await?;
        self.cache.put(&key, &token)?;
        Ok(token)
    }

    /// Remove the cached token for a session, returning it if present.
    pub fn pop_token_from_cache(
        &self,
        start_url: &str,
        session_name: Option<&str>,
    ) -> Result<Option<CachedToken>> {
        let key = token_cache_key(start_url, session_name);
        self.cache.pop(&key)
    }

    /// Attempt a refresh-token grant; any failure falls back to the device
    /// flow, so errors collapse to `None`.
    async fn refresh(&self, token: &CachedToken) -> Option<CachedToken> {
        let refresh_token = token.refresh_token.as_ref()?;
        let client_id = token.client_id.as_ref()?;
        let client_secret = token.client_secret.as_ref()?;
        let registration_expires_at = token.registration_expires_at.as_ref()?;

        match parse_timestamp(registration_expires_at) {
            Ok(expiry) if expiry > self.now() => {}
            _ => {
                tracing::debug!("Registration expired, skipping token refresh");
                return None;
            }
        }

        let request = CreateTokenRequest {
            grant_type: REFRESH_TOKEN_GRANT_TYPE.to_string(),
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            device_code: None,
            refresh_token: Some(refresh_token.clone()),
        };

        match self.oidc.create_token(&request).await {
            Ok(response) => {
                let mut new_token = self.build_token(
                    &token.start_url,
                    response,
                    client_id,
                    client_secret,
                    Some(registration_expires_at.clone()),
                    token.scopes.as_deref(),
                );
                if new_token.refresh_token.is_none() {
                    new_token.refresh_token = Some(refresh_token.clone());
                }
                Some(new_token)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Token refresh attempt failed");
                None
            }
        }
    }

    /// Get a live client registration, reusing the cache when possible.
    async fn registration(
        &self,
        start_url: &str,
        session_name: Option<&str>,
        scopes: Option<&[String]>,
    ) -> Result<CachedRegistration> {
        let key = registration_cache_key(
            TOOL_NAME,
            start_url,
            self.oidc.region(),
            scopes,
            session_name,
        );

        if let Some(registration) = self.cache.get::<CachedRegistration>(&key)? {
            if !self.is_expired(&registration.expires_at) {
                tracing::debug!("Using cached client registration");
                return Ok(registration);
            }
        }

        let client_name = match session_name {
            Some(name) => format!("{}-{}", TOOL_NAME, name),
            None => format!("{}-client-{}", TOOL_NAME, self.now().timestamp()),
        };

        let response = self.oidc.register_client(&client_name, scopes).await?;
        let expires_at = DateTime::<Utc>::from_timestamp(response.client_secret_expires_at, 0)
            .ok_or_else(|| {
                SsopulseError::Format(format!(
                    "Invalid registration expiration timestamp {}",
                    response.client_secret_expires_at
                ))
            })?;

        let registration = CachedRegistration {
            client_id: response.client_id,
            client_secret: response.client_secret,
            expires_at: format_timestamp(expires_at),
            received_at: Some(format_timestamp(self.now())),
            scopes: scopes.map(<[String]>::to_vec),
        };
        self.cache.put(&key, &registration)?;
        Ok(registration)
    }

    /// Run the device-authorization flow to completion.
    async fn device_flow(
        &self,
        start_url: &str,
        scopes: Option<&[String]>,
        registration: &CachedRegistration,
    ) -> Result<CachedToken> {
        let authorization = self
            .oidc
            .start_device_authorization(
                &registration.client_id,
                &registration.client_secret,
                start_url,
            )
            .await?;

        let expires_at = self.now() + Duration::seconds(authorization.expires_in as i64);
        let mut interval = authorization.interval.unwrap_or(DEFAULT_INTERVAL_SECS);

        let request = CreateTokenRequest {
            grant_type: DEVICE_CODE_GRANT_TYPE.to_string(),
            client_id: registration.client_id.clone(),
            client_secret: registration.client_secret.clone(),
            device_code: Some(authorization.device_code.clone()),
            refresh_token: None,
        };

        let build = |response: CreateTokenResponse| {
            self.build_token(
                start_url,
                response,
                &registration.client_id,
                &registration.client_secret,
                Some(registration.expires_at.clone()),
                scopes,
            )
        };

        // One attempt before prompting; the device may already be authorized
        match self.oidc.create_token(&request).await {
            Ok(response) => return Ok(build(response)),
            Err(e) if e.is_service_error("AuthorizationPendingException") => {}
            Err(e) if e.is_service_error("SlowDownException") => {
                interval += SLOW_DOWN_DELAY_SECS;
            }
            Err(e) if e.is_service_error("ExpiredTokenException") => {
                return Err(SsopulseError::PendingAuthorizationExpired)
            }
            Err(e) => return Err(e),
        }

        let pending = PendingAuthorization {
            user_code: authorization.user_code.clone(),
            verification_uri: authorization.verification_uri.clone(),
            verification_uri_complete: authorization.verification_uri_complete.clone(),
            expires_at,
        };
        self.on_pending_authorization.on_pending(&pending)?;

        loop {
            self.sleeper.sleep(interval).await;

            if self.now() >= expires_at {
                return Err(SsopulseError::PendingAuthorizationExpired);
            }

            match self.oidc.create_token(&request).await {
                Ok(response) => return Ok(build(response)),
                Err(e) if e.is_service_error("AuthorizationPendingException") => continue,
                Err(e) if e.is_service_error("SlowDownException") => {
                    interval += SLOW_DOWN_DELAY_SECS;
                }
                Err(e) if e.is_service_error("ExpiredTokenException") => {
                    return Err(SsopulseError::PendingAuthorizationExpired)
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn build_token(
        &self,
        start_url: &str,
        response: CreateTokenResponse,
        client_id: &str,
        client_secret: &str,
        registration_expires_at: Option<String>,
        scopes: Option<&[String]>,
    ) -> CachedToken {
        let now = self.now();
        CachedToken {
            start_url: start_url.to_string(),
            region: self.oidc.region().to_string(),
            access_token: response.access_token,
            expires_at: format_timestamp(now + Duration::seconds(response.expires_in as i64)),
            received_at: Some(format_timestamp(now)),
            client_id: Some(client_id.to_string()),
            client_secret: Some(client_secret.to_string()),
            registration_expires_at,
            refresh_token: response.refresh_token,
            scopes: scopes.map(<[String]>::to_vec),
        }
    }
}
