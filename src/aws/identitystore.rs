//! Identity Store API
//!
//! Group and user lookups by id or name. Name lookups use the attribute
//! filter form of `ListGroups`/`ListUsers`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::aws::rpc::RpcClient;
use crate::aws::signer::AwsCredentials;
use crate::errors::{Result, SsopulseError};

const TARGET_PREFIX: &str = "AWSIdentityStore";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupInfo {
    pub group_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserInfo {
    pub user_id: String,
    pub user_name: String,
}

/// Operations used from the Identity Store service
#[async_trait]
pub trait IdentityStoreApi: Send + Sync {
    async fn describe_group(&self, identity_store_id: &str, group_id: &str) -> Result<GroupInfo>;

    async fn describe_user(&self, identity_store_id: &str, user_id: &str) -> Result<UserInfo>;

    async fn list_groups_by_name(
        &self,
        identity_store_id: &str,
        display_name: &str,
    ) -> Result<Vec<GroupInfo>>;

    async fn list_users_by_name(
        &self,
        identity_store_id: &str,
        user_name: &str,
    ) -> Result<Vec<UserInfo>>;
}

/// HTTP implementation backed by the JSON-RPC transport
#[derive(Debug, Clone)]
pub struct HttpIdentityStore {
    rpc: RpcClient,
}

impl HttpIdentityStore {
    pub fn new(credentials: AwsCredentials, region: &str) -> Self {
        Self {
            rpc: RpcClient::new(credentials, region, "identitystore", TARGET_PREFIX),
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
impl IdentityStoreApi for HttpIdentityStore {
    async fn describe_group(&self, identity_store_id: &str, group_id: &str) -> Result<GroupInfo> {
        let response = self
            .rpc
            .call(
                "DescribeGroup",
                &json!({
                    "IdentityStoreId": identity_store_id,
                    "GroupId": group_id,
                }),
            )
            .await?;
        from_value(response)
    }

    async fn describe_user(&self, identity_store_id: &str, user_id: &str) -> Result<UserInfo> {
        let response = self
            .rpc
            .call(
                "DescribeUser",
                &json!({
                    "IdentityStoreId": identity_store_id,
                    "UserId": user_id,
                }),
            )
            .await?;
        from_value(response)
    }

    async fn list_groups_by_name(
        &self,
        identity_store_id: &str,
        display_name: &str,
    ) -> Result<Vec<GroupInfo>> {
        let items = self
            .rpc
            .call_paginated(
                "ListGroups",
                &json!({
                    "IdentityStoreId": identity_store_id,
                    "Filters": [
                        {"AttributePath": "DisplayName", "AttributeValue": display_name}
                    ],
                }),
                "Groups",
            )
            .await?;
        items.into_iter().map(from_value).collect()
    }

    async fn list_users_by_name(
        &self,
        identity_store_id: &str,
        user_name: &str,
    ) -> Result<Vec<UserInfo>> {
        let items = self
            .rpc
            .call_paginated(
                "ListUsers",
                &json!({
                    "IdentityStoreId": identity_store_id,
                    "Filters": [
                        {"AttributePath": "UserName", "AttributeValue": user_name}
                    ],
                }),
                "Users",
            )
            .await?;
        items.into_iter().map(from_value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_info() {
        let json = r#"{"GroupId": "g-1111", "DisplayName": "Developers"}"#;
        let group: GroupInfo = serde_json::from_str(json).unwrap();
        assert_eq!(group.display_name, "Developers");
    }

    #[test]
    fn test_parse_user_info() {
        let json = r#"{"UserId": "u-2222", "UserName": "jdoe"}"#;
        let user: UserInfo = serde_json::from_str(json).unwrap();
        assert_eq!(user.user_name, "jdoe");
    }
}
