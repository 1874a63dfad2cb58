//! AWS Signature Version 4 request signing
//!
//! The admin-plane APIs (SSO Admin, Identity Store, Organizations) require
//! SigV4-signed requests. Credentials come from the standard environment
//! variables; the OIDC and portal clients never sign.

use std::time::SystemTime;

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;

use crate::errors::{Result, SsopulseError};

/// Static AWS credentials for signing admin-plane requests
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Load credentials from the standard environment variables
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            SsopulseError::Argument("AWS_ACCESS_KEY_ID environment variable not set".to_string())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            SsopulseError::Argument(
                "AWS_SECRET_ACCESS_KEY environment variable not set".to_string(),
            )
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Sign an HTTP request with AWS SigV4, returning the headers to attach.
pub fn sign_request(
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<Vec<(String, String)>> {
    let parsed_url = url::Url::parse(url)?;

    let uri = format!(
        "{}{}",
        parsed_url.path(),
        parsed_url
            .query()
            .map(|q| format!("?{}", q))
            .unwrap_or_default()
    );

    let identity = Credentials::new(
        &credentials.access_key_id,
        &credentials.secret_access_key,
        credentials.session_token.clone(),
        None,
        "ssopulse",
    )
    .into();

    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(service)
        .time(SystemTime::now())
        .settings(SigningSettings::default())
        .build()
        .map_err(|e| SsopulseError::AuthDispatch(format!("Failed to build signing params: {}", e)))?;

    let host = parsed_url
        .host_str()
        .map(str::to_string)
        .unwrap_or_default();

    let mut all_headers: Vec<(String, String)> = headers.to_vec();
    if !host.is_empty() && !all_headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("host")) {
        all_headers.push(("host".to_string(), host));
    }

    let signable_body = if body.is_empty() {
        SignableBody::empty()
    } else {
        SignableBody::Bytes(body)
    };

    let signable_request = SignableRequest::new(
        method,
        &uri,
        all_headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        signable_body,
    )
    .map_err(|e| SsopulseError::AuthDispatch(format!("Failed to create signable request: {}", e)))?;

    let signing_output = sign(signable_request, &signing_params.into())
        .map_err(|e| SsopulseError::AuthDispatch(format!("Failed to sign request: {}", e)))?;

    let (signing_instructions, _signature) = signing_output.into_parts();

    let mut auth_headers = Vec::new();
    for (name, value) in signing_instructions.headers() {
        auth_headers.push((name.to_string(), value.to_string()));
    }

    Ok(auth_headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_request_produces_authorization() {
        let credentials = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        };

        let headers = sign_request(
            &credentials,
            "us-east-1",
            "sso",
            "POST",
            "https://sso.us-east-1.amazonaws.com/",
            &[("content-type".to_string(), "application/x-amz-json-1.1".to_string())],
            b"{}",
        )
        .unwrap();

        assert!(headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("authorization")
                && v.starts_with("AWS4-HMAC-SHA256")));
    }
}
