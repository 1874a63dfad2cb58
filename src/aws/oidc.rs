//! SSO OIDC client
//!
//! Client registration, device authorization and token creation against the
//! SSO OIDC endpoint. These calls are unsigned; the device-authorization
//! flow is defined in RFC 8628.

use serde::{Deserialize, Serialize};

use crate::aws::parse_service_error;
use crate::errors::{Result, SsopulseError};

/// Grant type for the device-authorization flow
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Grant type for refreshing an access token
pub const REFRESH_TOKEN_GRANT_TYPE: &str = "refresh_token";

/// Client type used when registering; SSO OIDC only supports public clients
pub const CLIENT_REGISTRATION_TYPE: &str = "public";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterClientResponse {
    pub client_id: String,
    pub client_secret: String,
    /// Unix timestamp at which the client secret expires
    pub client_secret_expires_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDeviceAuthorizationResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    /// Seconds until the device code expires
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenResponse {
    pub access_token: String,
    /// Seconds until the access token expires
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// SSO OIDC HTTP client
#[derive(Debug, Clone)]
pub struct OidcClient {
    client: reqwest::Client,
    region: String,
    endpoint: Option<String>,
}

impl OidcClient {
    pub fn new(region: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            region: region.to_string(),
            endpoint: None,
        }
    }

    /// Override the endpoint, for tests
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn url(&self, path: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}{}", endpoint, path),
            None => format!("https://oidc.{}.amazonaws.com{}", self.region, path),
        }
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(parse_service_error(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(SsopulseError::from)
    }

    /// Register a public OIDC client, optionally with registration scopes.
    pub async fn register_client(
        &self,
        client_name: &str,
        scopes: Option<&[String]>,
    ) -> Result<RegisterClientResponse> {
        tracing::debug!(client_name, "Registering OIDC client");
        let mut body = serde_json::json!({
            "clientName": client_name,
            "clientType": CLIENT_REGISTRATION_TYPE,
        });
        if let Some(scopes) = scopes {
            body["scopes"] = serde_json::json!(scopes);
        }
        self.post("/client/register", &body).await
    }

    /// Begin the device-authorization flow for a start URL.
    pub async fn start_device_authorization(
        &self,
        client_id: &str,
        client_secret: &str,
        start_url: &str,
    ) -> Result<StartDeviceAuthorizationResponse> {
        tracing::debug!(start_url, "Starting device authorization");
        let body = serde_json::json!({
            "clientId": client_id,
            "clientSecret": client_secret,
            "startUrl": start_url,
        });
        self.post("/device_authorization", &body).await
    }

    /// Exchange a device code or refresh token for an access token.
    pub async fn create_token(&self, request: &CreateTokenRequest) -> Result<CreateTokenResponse> {
        tracing::debug!(grant_type = %request.grant_type, "Creating token");
        self.post("/token", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_token_request_skips_absent_fields() {
        let request = CreateTokenRequest {
            grant_type: DEVICE_CODE_GRANT_TYPE.to_string(),
            client_id: "cid".to_string(),
            client_secret: "csec".to_string(),
            device_code: Some("dev".to_string()),
            refresh_token: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["deviceCode"], "dev");
        assert!(value.get("refreshToken").is_none());
    }

    #[test]
    fn test_parse_device_authorization_response() {
        let json = r#"{
            "deviceCode": "D",
            "userCode": "UC-CODE",
            "verificationUri": "https://device.sso.us-east-1.amazonaws.com/",
            "verificationUriComplete": "https://device.sso.us-east-1.amazonaws.com/?user_code=UC-CODE",
            "expiresIn": 600,
            "interval": 5
        }"#;
        let response: StartDeviceAuthorizationResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.user_code, "UC-CODE");
        assert_eq!(response.interval, Some(5));
    }

    #[test]
    fn test_endpoint_override() {
        let client = OidcClient::new("us-east-1").with_endpoint("http://127.0.0.1:9999/");
        assert_eq!(client.url("/token"), "http://127.0.0.1:9999/token");
        let client = OidcClient::new("us-east-1");
        assert_eq!(client.url("/token"), "https://oidc.us-east-1.amazonaws.com/token");
    }
}
