//! AWS service boundary
//!
//! Thin HTTP clients for the services the toolkit talks to:
//! - `oidc` - SSO OIDC device-authorization endpoints (unsigned)
//! - `portal` - the SSO portal (bearer-token authenticated)
//! - `admin`, `identitystore`, `orgs` - SigV4-signed JSON-RPC admin APIs,
//!   behind traits so the resolver and lookup layers can be tested without
//!   a network
//!
//! Every client takes an optional endpoint override so tests can point it
//! at a local mock server.

pub mod admin;
pub mod identitystore;
pub mod oidc;
pub mod orgs;
pub mod portal;
pub mod rpc;
pub mod signer;

use serde_json::Value;

use crate::errors::SsopulseError;

/// Parse an error response body into a service error.
///
/// The OIDC token endpoints answer with OAuth-style `{"error": ...}` bodies;
/// the JSON-RPC APIs answer with `{"__type": "...#SomeException"}`. Both are
/// normalized to the exception-style code the callers match on.
pub fn parse_service_error(status: u16, body: &str) -> SsopulseError {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            let code = oauth_error_code(error);
            let message = value
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or(error)
                .to_string();
            return SsopulseError::Service { code, message };
        }
        if let Some(type_field) = value.get("__type").and_then(Value::as_str) {
            let code = type_field
                .rsplit('#')
                .next()
                .unwrap_or(type_field)
                .to_string();
            let message = value
                .get("message")
                .or_else(|| value.get("Message"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return SsopulseError::Service { code, message };
        }
    }
    SsopulseError::Service {
        code: format!("Http{}", status),
        message: body.to_string(),
    }
}

/// Map an OAuth error string to the exception-style code used internally.
fn oauth_error_code(error: &str) -> String {
    match error {
        "authorization_pending" => "AuthorizationPendingException".to_string(),
        "slow_down" => "SlowDownException".to_string(),
        "expired_token" => "ExpiredTokenException".to_string(),
        "access_denied" => "AccessDeniedException".to_string(),
        "invalid_grant" => "InvalidGrantException".to_string(),
        "invalid_client" => "InvalidClientException".to_string(),
        "invalid_request" => "InvalidRequestException".to_string(),
        "unauthorized_client" => "UnauthorizedClientException".to_string(),
        other => other.to_string(),
    }
}
