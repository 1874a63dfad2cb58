//! Assignment resolver integration tests
//!
//! Uses in-memory service fakes modeling a small organization:
//! root r-root holds accounts A1 and A2 directly and a child OU holding A3.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use ssopulse::assignments::{
    collect_assignments, PrincipalSpec, ResolverOptions, TargetSpec,
};
use ssopulse::aws::admin::{AccountAssignment, InstanceInfo, PermissionSetInfo, SsoAdminApi};
use ssopulse::aws::identitystore::{GroupInfo, IdentityStoreApi, UserInfo};
use ssopulse::aws::orgs::{OrgAccount, OrgUnit, Organization, OrganizationsApi};
use ssopulse::errors::{Result, SsopulseError};
use ssopulse::lookup::Ids;

const INSTANCE_ARN: &str = "arn:aws:sso:::instance/ssoins-1234567890abcdef";
const PS_ARN: &str = "arn:aws:sso:::permissionSet/ssoins-1234567890abcdef/ps-abc";

struct FakeAdmin {
    describe_calls: AtomicUsize,
}

impl FakeAdmin {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            describe_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SsoAdminApi for FakeAdmin {
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>> {
        Ok(vec![InstanceInfo {
            instance_arn: INSTANCE_ARN.to_string(),
            identity_store_id: "d-1234567890".to_string(),
        }])
    }

    async fn describe_permission_set(
        &self,
        _instance_arn: &str,
        permission_set_arn: &str,
    ) -> Result<PermissionSetInfo> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PermissionSetInfo {
            permission_set_arn: permission_set_arn.to_string(),
            name: "Developer".to_string(),
            description: None,
            session_duration: None,
        })
    }

    async fn list_permission_sets(&self, _instance_arn: &str) -> Result<Vec<String>> {
        Ok(vec![PS_ARN.to_string()])
    }

    async fn list_permission_sets_provisioned_to_account(
        &self,
        _instance_arn: &str,
        _account_id: &str,
    ) -> Result<Vec<String>> {
        Ok(vec![PS_ARN.to_string()])
    }

    async fn list_account_assignments(
        &self,
        _instance_arn: &str,
        account_id: &str,
        permission_set_arn: &str,
    ) -> Result<Vec<AccountAssignment>> {
        // Every account has assignments for group g-1 and user u-1
        Ok(vec![
            AccountAssignment {
                account_id: account_id.to_string(),
                permission_set_arn: permission_set_arn.to_string(),
                principal_type: "GROUP".to_string(),
                principal_id: "g-1".to_string(),
            },
            AccountAssignment {
                account_id: account_id.to_string(),
                permission_set_arn: permission_set_arn.to_string(),
                principal_type: "USER".to_string(),
                principal_id: "u-1".to_string(),
            },
        ])
    }
}

struct FakeStore;

#[async_trait]
impl IdentityStoreApi for FakeStore {
    async fn describe_group(&self, _store: &str, group_id: &str) -> Result<GroupInfo> {
        if group_id == "g-1" {
            Ok(GroupInfo {
                group_id: group_id.to_string(),
                display_name: "Developers".to_string(),
            })
        } else {
            Err(SsopulseError::Service {
                code: "ResourceNotFoundException".to_string(),
                message: "no such group".to_string(),
            })
        }
    }

    async fn describe_user(&self, _store: &str, user_id: &str) -> Result<UserInfo> {
        Ok(UserInfo {
            user_id: user_id.to_string(),
            user_name: "jdoe".to_string(),
        })
    }

    async fn list_groups_by_name(&self, _store: &str, _name: &str) -> Result<Vec<GroupInfo>> {
        Ok(vec![])
    }

    async fn list_users_by_name(&self, _store: &str, _name: &str) -> Result<Vec<UserInfo>> {
        Ok(vec![])
    }
}

struct FakeOrgs;

fn account(id: &str, name: &str) -> OrgAccount {
    OrgAccount {
        id: id.to_string(),
        name: Some(name.to_string()),
        status: None,
    }
}

#[async_trait]
impl OrganizationsApi for FakeOrgs {
    async fn list_accounts(&self) -> Result<Vec<OrgAccount>> {
        Ok(vec![
            account("111111111111", "A1"),
            account("222222222222", "A2"),
            account("333333333333", "A3"),
        ])
    }

    async fn list_accounts_for_parent(&self, parent_id: &str) -> Result<Vec<OrgAccount>> {
        match parent_id {
            "r-root" => Ok(vec![
                account("111111111111", "A1"),
                account("222222222222", "A2"),
            ]),
            "ou-root-subsub01" => Ok(vec![account("333333333333", "A3")]),
            _ => Ok(vec![]),
        }
    }

    async fn list_organizational_units_for_parent(&self, parent_id: &str) -> Result<Vec<OrgUnit>> {
        match parent_id {
            "r-root" => Ok(vec![OrgUnit {
                id: "ou-root-subsub01".to_string(),
                name: None,
            }]),
            _ => Ok(vec![]),
        }
    }

    async fn describe_account(&self, account_id: &str) -> Result<OrgAccount> {
        Ok(account(account_id, "A"))
    }

    async fn describe_organization(&self) -> Result<Organization> {
        Ok(Organization {
            id: "o-abc".to_string(),
            master_account_id: "999999999999".to_string(),
        })
    }
}

fn ids(admin: Arc<FakeAdmin>) -> Ids {
    Ids::new(admin, None, None)
}

#[tokio::test]
async fn test_ou_expansion_preserves_order() {
    let admin = FakeAdmin::new();
    let ids = ids(admin.clone());

    let options = ResolverOptions {
        principals: Some(vec![PrincipalSpec::Group("g-1".to_string())]),
        permission_sets: Some(vec!["ps-abc".to_string()]),
        targets: Some(vec![TargetSpec::Ou("r-root".to_string())]),
        ou_recursive: true,
        ..Default::default()
    };

    let assignments = collect_assignments(admin.as_ref(), &FakeStore, &FakeOrgs, &ids, &options)
        .await
        .unwrap();

    let rows: Vec<(String, String, String)> = assignments
        .iter()
        .map(|a| {
            (
                a.principal_id.clone(),
                a.permission_set_arn.clone(),
                a.target_id.clone(),
            )
        })
        .collect();
    assert_eq!(
        rows,
        vec![
            ("g-1".to_string(), PS_ARN.to_string(), "111111111111".to_string()),
            ("g-1".to_string(), PS_ARN.to_string(), "222222222222".to_string()),
            ("g-1".to_string(), PS_ARN.to_string(), "333333333333".to_string()),
        ]
    );
    for assignment in &assignments {
        assert_eq!(assignment.instance_arn, INSTANCE_ARN);
        assert_eq!(assignment.target_type, "AWS_ACCOUNT");
    }
}

#[tokio::test]
async fn test_non_recursive_ou_skips_child_accounts() {
    let admin = FakeAdmin::new();
    let ids = ids(admin.clone());

    let options = ResolverOptions {
        principals: Some(vec![PrincipalSpec::Group("g-1".to_string())]),
        permission_sets: Some(vec!["ps-abc".to_string()]),
        targets: Some(vec![TargetSpec::Ou("r-root".to_string())]),
        ou_recursive: false,
        ..Default::default()
    };

    let assignments = collect_assignments(admin.as_ref(), &FakeStore, &FakeOrgs, &ids, &options)
        .await
        .unwrap();
    let targets: Vec<&str> = assignments.iter().map(|a| a.target_id.as_str()).collect();
    assert_eq!(targets, vec!["111111111111", "222222222222"]);
}

#[tokio::test]
async fn test_unfiltered_expansion_is_full_cross_product() {
    let admin = FakeAdmin::new();
    let ids = ids(admin.clone());

    // No principals, permission sets, or targets: everything is listed
    let options = ResolverOptions::default();
    let assignments = collect_assignments(admin.as_ref(), &FakeStore, &FakeOrgs, &ids, &options)
        .await
        .unwrap();

    // 3 accounts x 1 permission set x 2 principals
    assert_eq!(assignments.len(), 6);
}

#[tokio::test]
async fn test_bare_principal_id_matches_any_type() {
    let admin = FakeAdmin::new();
    let ids = ids(admin.clone());

    let options = ResolverOptions {
        principals: Some(vec![PrincipalSpec::Any("u-1".to_string())]),
        permission_sets: Some(vec!["ps-abc".to_string()]),
        targets: Some(vec![TargetSpec::Account("111111111111".to_string())]),
        ..Default::default()
    };
    let assignments = collect_assignments(admin.as_ref(), &FakeStore, &FakeOrgs, &ids, &options)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].principal_type, "USER");

    // A typed spec with the wrong type matches nothing
    let options = ResolverOptions {
        principals: Some(vec![PrincipalSpec::Group("u-1".to_string())]),
        permission_sets: Some(vec!["ps-abc".to_string()]),
        targets: Some(vec![TargetSpec::Account("111111111111".to_string())]),
        ..Default::default()
    };
    let assignments = collect_assignments(admin.as_ref(), &FakeStore, &FakeOrgs, &ids, &options)
        .await
        .unwrap();
    assert!(assignments.is_empty());
}

#[tokio::test]
async fn test_name_lookups_are_memoized() {
    let admin = FakeAdmin::new();
    let ids = ids(admin.clone());

    let options = ResolverOptions {
        principals: Some(vec![PrincipalSpec::Group("g-1".to_string())]),
        permission_sets: Some(vec!["ps-abc".to_string()]),
        targets: Some(vec![
            TargetSpec::Account("111111111111".to_string()),
            TargetSpec::Account("222222222222".to_string()),
            TargetSpec::Account("333333333333".to_string()),
        ]),
        get_principal_names: true,
        get_permission_set_names: true,
        ..Default::default()
    };

    let assignments = collect_assignments(admin.as_ref(), &FakeStore, &FakeOrgs, &ids, &options)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 3);
    for assignment in &assignments {
        assert_eq!(assignment.principal_name.as_deref(), Some("Developers"));
        assert_eq!(assignment.permission_set_name.as_deref(), Some("Developer"));
    }
    // One DescribePermissionSet despite three targets
    assert_eq!(admin.describe_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_filters_are_applied() {
    let admin = FakeAdmin::new();
    let ids = ids(admin.clone());

    let options = ResolverOptions {
        principals: None,
        permission_sets: Some(vec!["ps-abc".to_string()]),
        targets: Some(vec![
            TargetSpec::Account("111111111111".to_string()),
            TargetSpec::Account("222222222222".to_string()),
        ]),
        target_filter: Some(Box::new(|_type, id, _name| id != "222222222222")),
        principal_filter: Some(Box::new(|principal_type, _id, _name| {
            principal_type == "GROUP"
        })),
        ..Default::default()
    };

    let assignments = collect_assignments(admin.as_ref(), &FakeStore, &FakeOrgs, &ids, &options)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].target_id, "111111111111");
    assert_eq!(assignments[0].principal_type, "GROUP");
}
