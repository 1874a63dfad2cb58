//! SSO portal client
//!
//! The portal is the user-facing data plane: it lists the accounts and roles
//! an access token grants, exchanges the token for role credentials, and
//! invalidates the token on logout. Requests authenticate with the
//! `x-amz-sso_bearer_token` header rather than SigV4.

use serde::Deserialize;

use crate::aws::parse_service_error;
use crate::errors::{Result, SsopulseError};

const BEARER_TOKEN_HEADER: &str = "x-amz-sso_bearer_token";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub account_id: String,
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleInfo {
    pub role_name: String,
    pub account_id: String,
}

/// Temporary role credentials as returned by the portal
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// Expiration as epoch milliseconds
    pub expiration: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAccountsResponse {
    account_list: Vec<AccountInfo>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAccountRolesResponse {
    role_list: Vec<RoleInfo>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRoleCredentialsResponse {
    role_credentials: RoleCredentials,
}

/// SSO portal HTTP client
#[derive(Debug, Clone)]
pub struct PortalClient {
    client: reqwest::Client,
    region: String,
    endpoint: Option<String>,
}

impl PortalClient {
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

    fn url(&self, path: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}{}", endpoint, path),
            None => format!("https://portal.sso.{}.amazonaws.com{}", self.region, path),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        access_token: &str,
        url: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header(BEARER_TOKEN_HEADER, access_token)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(parse_service_error(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(SsopulseError::from)
    }

    /// Exchange the access token for temporary role credentials.
    pub async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials> {
        tracing::debug!(account_id, role_name, "Fetching role credentials");
        let url = format!(
            "{}?account_id={}&role_name={}",
            self.url("/federation/credentials"),
            urlencoding::encode(account_id),
            urlencoding::encode(role_name),
        );
        let response: GetRoleCredentialsResponse = self.get_json(access_token, &url).await?;
        Ok(response.role_credentials)
    }

    /// List the accounts the token grants access to, following pagination.
    pub async fn list_accounts(&self, access_token: &str) -> Result<Vec<AccountInfo>> {
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut url = self.url("/assignment/accounts");
            if let Some(token) = &next_token {
                url = format!("{}?next_token={}", url, urlencoding::encode(token));
            }
            let response: ListAccountsResponse = self.get_json(access_token, &url).await?;
            accounts.extend(response.account_list);
            match response.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(accounts)
    }

    /// List the roles the token grants in an account, following pagination.
    pub async fn list_account_roles(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<Vec<RoleInfo>> {
        let mut roles = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut url = format!(
                "{}?account_id={}",
                self.url("/assignment/roles"),
                urlencoding::encode(account_id)
            );
            if let Some(token) = &next_token {
                url = format!("{}&next_token={}", url, urlencoding::encode(token));
            }
            let response: ListAccountRolesResponse = self.get_json(access_token, &url).await?;
            roles.extend(response.role_list);
            match response.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(roles)
    }

    /// Invalidate the access token server-side.
    pub async fn logout(&self, access_token: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/logout"))
            .header(BEARER_TOKEN_HEADER, access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(parse_service_error(status.as_u16(), &text));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role_credentials() {
        let json = r#"{
            "roleCredentials": {
                "accessKeyId": "ASIAEXAMPLE",
                "secretAccessKey": "secret",
                "sessionToken": "token",
                "expiration": 1700000000000
            }
        }"#;
        let response: GetRoleCredentialsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.role_credentials.access_key_id, "ASIAEXAMPLE");
        assert_eq!(response.role_credentials.expiration, 1700000000000);
    }

    #[test]
    fn test_default_endpoint() {
        let client = PortalClient::new("eu-west-1");
        assert_eq!(
            client.url("/logout"),
            "https://portal.sso.eu-west-1.amazonaws.com/logout"
        );
    }
}
