//! Organizations API
//!
//! Account enumeration and OU traversal. Organizations is a global service;
//! its endpoint lives in the aws partition's primary region.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::aws::rpc::RpcClient;
use crate::aws::signer::AwsCredentials;
use crate::errors::{Result, SsopulseError};

const TARGET_PREFIX: &str = "AWSOrganizationsV20161128";
const ORGANIZATIONS_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrgAccount {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrgUnit {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Organization {
    pub id: String,
    pub master_account_id: String,
}

/// Operations used from the Organizations service
#[async_trait]
pub trait OrganizationsApi: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<OrgAccount>>;

    async fn list_accounts_for_parent(&self, parent_id: &str) -> Result<Vec<OrgAccount>>;

    async fn list_organizational_units_for_parent(&self, parent_id: &str) -> Result<Vec<OrgUnit>>;

    async fn describe_account(&self, account_id: &str) -> Result<OrgAccount>;

    async fn describe_organization(&self) -> Result<Organization>;
}

/// HTTP implementation backed by the JSON-RPC transport
#[derive(Debug, Clone)]
pub struct HttpOrganizations {
    rpc: RpcClient,
}

impl HttpOrganizations {
    pub fn new(credentials: AwsCredentials) -> Self {
        Self {
            rpc: RpcClient::new(
                credentials,
                ORGANIZATIONS_REGION,
                "organizations",
                TARGET_PREFIX,
            ),
        }
    }

    /// Override the endpoint, for tests
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.rpc = self.rpc.with_endpoint(endpoint);
        self
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(SsopulseError::from)
}

#[async_trait]
impl OrganizationsApi for HttpOrganizations {
    async fn list_accounts(&self) -> Result<Vec<OrgAccount>> {
        let items = self
            .rpc
            .call_paginated("ListAccounts", &json!({}), "Accounts")
            .await?;
        items.into_iter().map(from_value).collect()
    }

    async fn list_accounts_for_parent(&self, parent_id: &str) -> Result<Vec<OrgAccount>> {
        let items = self
            .rpc
            .call_paginated(
                "ListAccountsForParent",
                &json!({"ParentId": parent_id}),
                "Accounts",
            )
            .await?;
        items.into_iter().map(from_value).collect()
    }

    async fn list_organizational_units_for_parent(&self, parent_id: &str) -> Result<Vec<OrgUnit>> {
        let items = self
            .rpc
            .call_paginated(
                "ListOrganizationalUnitsForParent",
                &json!({"ParentId": parent_id}),
                "OrganizationalUnits",
            )
            .await?;
        items.into_iter().map(from_value).collect()
    }

    async fn describe_account(&self, account_id: &str) -> Result<OrgAccount> {
        let response = self
            .rpc
            .call("DescribeAccount", &json!({"AccountId": account_id}))
            .await?;
        from_value(response["Account"].clone())
    }

    async fn describe_organization(&self) -> Result<Organization> {
        let response = self.rpc.call("DescribeOrganization", &json!({})).await?;
        from_value(response["Organization"].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_account_without_name() {
        let json = r#"{"Id": "123456789012"}"#;
        let account: OrgAccount = serde_json::from_str(json).unwrap();
        assert_eq!(account.id, "123456789012");
        assert!(account.name.is_none());
    }

    #[test]
    fn test_parse_organization() {
        let json = r#"{"Id": "o-abcdef", "MasterAccountId": "999999999999"}"#;
        let org: Organization = serde_json::from_str(json).unwrap();
        assert_eq!(org.master_account_id, "999999999999");
    }
}
