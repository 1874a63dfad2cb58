//! SSO instance discovery
//!
//! Wraps `ListInstances` and memoizes the answer. A caller may pin the
//! instance ARN, the identity store id, both, or neither; discovery fills in
//! whatever is missing and validates whatever was pinned.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::aws::admin::SsoAdminApi;
use crate::errors::{Result, SsopulseError};
use crate::format::{format_instance_arn, instance_id_from_arn};

/// Lazily resolved SSO instance / identity store pair.
///
/// Callers sharing an `Ids` see identical answers; there is no process-wide
/// singleton.
pub struct Ids {
    admin: Arc<dyn SsoAdminApi>,
    specified_instance_arn: Option<String>,
    specified_identity_store_id: Option<String>,
    resolved: OnceCell<(String, String)>,
}

impl Ids {
    pub fn new(
        admin: Arc<dyn SsoAdminApi>,
        instance_arn: Option<&str>,
        identity_store_id: Option<&str>,
    ) -> Self {
        Self {
            admin,
            specified_instance_arn: instance_arn.map(format_instance_arn),
            specified_identity_store_id: identity_store_id.map(str::to_string),
            resolved: OnceCell::new(),
        }
    }

    /// Whether an instance matches the pinned ARN (always true if unpinned).
    pub fn instance_arn_matches(&self, instance: &str) -> bool {
        match &self.specified_instance_arn {
            None => true,
            Some(specified) => &format_instance_arn(instance) == specified,
        }
    }

    pub async fn instance_arn(&self) -> Result<String> {
        Ok(self.resolve().await?.0)
    }

    pub async fn instance_id(&self) -> Result<String> {
        let arn = self.instance_arn().await?;
        Ok(instance_id_from_arn(&arn).to_string())
    }

    pub async fn identity_store_id(&self) -> Result<String> {
        Ok(self.resolve().await?.1)
    }

    async fn resolve(&self) -> Result<(String, String)> {
        self.resolved
            .get_or_try_init(|| self.lookup())
            .await
            .cloned()
    }

    async fn lookup(&self) -> Result<(String, String)> {
        if let (Some(arn), Some(store)) = (
            &self.specified_instance_arn,
            &self.specified_identity_store_id,
        ) {
            return Ok((arn.clone(), store.clone()));
        }

        let instances = self.admin.list_instances().await?;

        if instances.is_empty() {
            return Err(SsopulseError::Lookup(
                "No SSO instance found, please specify the instance ARN".to_string(),
            ));
        }

        let instance = if let Some(specified) = &self.specified_instance_arn {
            instances
                .iter()
                .find(|i| &i.instance_arn == specified)
                .ok_or_else(|| {
                    SsopulseError::Lookup(format!(
                        "No SSO instance found matching {}",
                        specified
                    ))
                })?
        } else if let Some(specified) = &self.specified_identity_store_id {
            let matching: Vec<_> = instances
                .iter()
                .filter(|i| &i.identity_store_id == specified)
                .collect();
            match matching.len() {
                0 => {
                    return Err(SsopulseError::Lookup(format!(
                        "No SSO instance found matching identity store id {}",
                        specified
                    )))
                }
                1 => matching[0],
                n => {
                    let arns: Vec<&str> =
                        matching.iter().map(|i| i.instance_arn.as_str()).collect();
                    return Err(SsopulseError::Lookup(format!(
                        "{} SSO instances found matching identity store id {}, please specify SSO instance ARN: {}",
                        n,
                        specified,
                        arns.join(", ")
                    )));
                }
            }
        } else if instances.len() > 1 {
            let arns: Vec<&str> = instances.iter().map(|i| i.instance_arn.as_str()).collect();
            return Err(SsopulseError::Lookup(format!(
                "{} SSO instances found, please specify SSO instance ARN: {}",
                instances.len(),
                arns.join(", ")
            )));
        } else {
            &instances[0]
        };

        tracing::info!(
            instance = instance_id_from_arn(&instance.instance_arn),
            "Using SSO instance"
        );
        Ok((
            instance.instance_arn.clone(),
            instance.identity_store_id.clone(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::aws::admin::{AccountAssignment, InstanceInfo, PermissionSetInfo};
    use async_trait::async_trait;

    pub(crate) struct FakeAdmin {
        pub instances: Vec<InstanceInfo>,
    }

    impl FakeAdmin {
        pub fn single() -> Self {
            Self {
                instances: vec![InstanceInfo {
                    instance_arn: "arn:aws:sso:::instance/ssoins-1234567890abcdef".to_string(),
                    identity_store_id: "d-1234567890".to_string(),
                }],
            }
        }
    }

    #[async_trait]
    impl SsoAdminApi for FakeAdmin {
        async fn list_instances(&self) -> Result<Vec<InstanceInfo>> {
            Ok(self.instances.clone())
        }

        async fn describe_permission_set(
            &self,
            _instance_arn: &str,
            permission_set_arn: &str,
        ) -> Result<PermissionSetInfo> {
            Ok(PermissionSetInfo {
                permission_set_arn: permission_set_arn.to_string(),
                name: "Fake".to_string(),
                description: None,
                session_duration: None,
            })
        }

        async fn list_permission_sets(&self, _instance_arn: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn list_permission_sets_provisioned_to_account(
            &self,
            _instance_arn: &str,
            _account_id: &str,
        ) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn list_account_assignments(
            &self,
            _instance_arn: &str,
            _account_id: &str,
            _permission_set_arn: &str,
        ) -> Result<Vec<AccountAssignment>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_single_instance_resolves() {
        let ids = Ids::new(Arc::new(FakeAdmin::single()), None, None);
        assert_eq!(
            ids.instance_arn().await.unwrap(),
            "arn:aws:sso:::instance/ssoins-1234567890abcdef"
        );
        assert_eq!(ids.identity_store_id().await.unwrap(), "d-1234567890");
        assert_eq!(ids.instance_id().await.unwrap(), "ssoins-1234567890abcdef");
    }

    #[tokio::test]
    async fn test_multiple_instances_require_pin() {
        let admin = FakeAdmin {
            instances: vec![
                InstanceInfo {
                    instance_arn: "arn:aws:sso:::instance/ssoins-aaaa".to_string(),
                    identity_store_id: "d-aaaa".to_string(),
                },
                InstanceInfo {
                    instance_arn: "arn:aws:sso:::instance/ssoins-bbbb".to_string(),
                    identity_store_id: "d-bbbb".to_string(),
                },
            ],
        };
        let ids = Ids::new(Arc::new(admin), None, None);
        let err = ids.instance_arn().await.unwrap_err();
        assert!(err.to_string().contains("ssoins-aaaa"));
        assert!(err.to_string().contains("ssoins-bbbb"));
    }

    #[tokio::test]
    async fn test_pinned_instance_fills_identity_store() {
        let admin = FakeAdmin {
            instances: vec![
                InstanceInfo {
                    instance_arn: "arn:aws:sso:::instance/ssoins-aaaa".to_string(),
                    identity_store_id: "d-aaaa".to_string(),
                },
                InstanceInfo {
                    instance_arn: "arn:aws:sso:::instance/ssoins-bbbb".to_string(),
                    identity_store_id: "d-bbbb".to_string(),
                },
            ],
        };
        // A bare instance id normalizes to the full ARN
        let ids = Ids::new(Arc::new(admin), Some("ssoins-bbbb"), None);
        assert_eq!(ids.identity_store_id().await.unwrap(), "d-bbbb");
    }

    #[tokio::test]
    async fn test_both_pinned_skips_lookup() {
        let admin = FakeAdmin { instances: vec![] };
        let ids = Ids::new(Arc::new(admin), Some("ssoins-cccc"), Some("d-cccc"));
        // Would fail if ListInstances were called, since the fake has none
        assert_eq!(
            ids.instance_arn().await.unwrap(),
            "arn:aws:sso:::instance/ssoins-cccc"
        );
    }

    #[test]
    fn test_instance_arn_matches() {
        let ids = Ids::new(Arc::new(FakeAdmin::single()), Some("ssoins-aaaa"), None);
        assert!(ids.instance_arn_matches("ssoins-aaaa"));
        assert!(ids.instance_arn_matches("arn:aws:sso:::instance/ssoins-aaaa"));
        assert!(!ids.instance_arn_matches("ssoins-bbbb"));
    }
}
