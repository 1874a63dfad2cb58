//! SSO Admin API
//!
//! The operations the identifier resolver and assignment resolver call on
//! the `sso-admin` service, behind a trait so tests can substitute an
//! in-memory directory.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::aws::rpc::RpcClient;
use crate::aws::signer::AwsCredentials;
use crate::errors::{Result, SsopulseError};

const TARGET_PREFIX: &str = "SWBExternalService";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceInfo {
    pub instance_arn: String,
    pub identity_store_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PermissionSetInfo {
    pub permission_set_arn: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub session_duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountAssignment {
    pub account_id: String,
    pub permission_set_arn: String,
    pub principal_type: String,
    pub principal_id: String,
}

/// Operations used from the SSO Admin service
#[async_trait]
pub trait SsoAdminApi: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>>;

    async fn describe_permission_set(
        &self,
        instance_arn: &str,
        permission_set_arn: &str,
    ) -> Result<PermissionSetInfo>;

    async fn list_permission_sets(&self, instance_arn: &str) -> Result<Vec<String>>;

    async fn list_permission_sets_provisioned_to_account(
        &self,
        instance_arn: &str,
        account_id: &str,
    ) -> Result<Vec<String>>;

    async fn list_account_assignments(
        &self,
        instance_arn: &str,
        account_id: &str,
        permission_set_arn: &str,
    ) -> Result<Vec<AccountAssignment>>;
}

/// HTTP implementation backed by the JSON-RPC transport
#[derive(Debug, Clone)]
pub struct HttpSsoAdmin {
    rpc: RpcClient,
}

impl HttpSsoAdmin {
    pub fn new(credentials: AwsCredentials, region: &str) -> Self {
        Self {
            rpc: RpcClient::new(credentials, region, "sso", TARGET_PREFIX),
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
impl SsoAdminApi for HttpSsoAdmin {
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>> {
        let items = self
            .rpc
            .call_paginated("ListInstances", &json!({}), "Instances")
            .await?;
        items.into_iter().map(from_value).collect()
    }

    async fn describe_permission_set(
        &self,
        instance_arn: &str,
        permission_set_arn: &str,
    ) -> Result<PermissionSetInfo> {
        let response = self
            .rpc
            .call(
                "DescribePermissionSet",
                &json!({
                    "InstanceArn": instance_arn,
                    "PermissionSetArn": permission_set_arn,
                }),
            )
            .await?;
        from_value(response["PermissionSet"].clone())
    }

    async fn list_permission_sets(&self, instance_arn: &str) -> Result<Vec<String>> {
        let items = self
            .rpc
            .call_paginated(
                "ListPermissionSets",
                &json!({"InstanceArn": instance_arn}),
                "PermissionSets",
            )
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn list_permission_sets_provisioned_to_account(
        &self,
        instance_arn: &str,
        account_id: &str,
    ) -> Result<Vec<String>> {
        let items = self
            .rpc
            .call_paginated(
                "ListPermissionSetsProvisionedToAccount",
                &json!({
                    "InstanceArn": instance_arn,
                    "AccountId": account_id,
                }),
                "PermissionSets",
            )
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn list_account_assignments(
        &self,
        instance_arn: &str,
        account_id: &str,
        permission_set_arn: &str,
    ) -> Result<Vec<AccountAssignment>> {
        let items = self
            .rpc
            .call_paginated(
                "ListAccountAssignments",
                &json!({
                    "InstanceArn": instance_arn,
                    "AccountId": account_id,
                    "PermissionSetArn": permission_set_arn,
                }),
                "AccountAssignments",
            )
            .await?;
        items.into_iter().map(from_value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instance_info() {
        let json = r#"{
            "InstanceArn": "arn:aws:sso:::instance/ssoins-1234567890abcdef",
            "IdentityStoreId": "d-1234567890"
        }"#;
        let info: InstanceInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.identity_store_id, "d-1234567890");
    }

    #[test]
    fn test_parse_account_assignment() {
        let json = r#"{
            "AccountId": "123456789012",
            "PermissionSetArn": "arn:aws:sso:::permissionSet/ssoins-1/ps-1",
            "PrincipalType": "GROUP",
            "PrincipalId": "g-1111"
        }"#;
        let assignment: AccountAssignment = serde_json::from_str(json).unwrap();
        assert_eq!(assignment.principal_type, "GROUP");
    }
}
