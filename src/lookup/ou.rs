//! OU-to-accounts traversal
//!
//! Expands an organizational unit (or root) into its accounts, optionally
//! recursing through child OUs. Direct-account and child-OU listings cache
//! independently under `<ou>#accounts` and `<ou>#children`, so a traversal
//! repeated with a different recursion depth reuses what it can.

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::aws::orgs::{OrgAccount, OrganizationsApi};
use crate::errors::Result;
use crate::format::format_account_id;
use crate::lookup::{CacheEntry, LookupCache};

/// Whether to drop the organization management account from results.
#[derive(Debug, Clone, Default)]
pub enum ExcludeOrgMgmt {
    #[default]
    No,
    /// Resolve the management account via `DescribeOrganization`
    Lookup,
    /// The management account id is already known
    AccountId(String),
}

/// List the accounts under an OU, depth-first, direct accounts before child
/// OUs, preserving the service's listing order.
pub async fn lookup_accounts_for_ou(
    orgs: &dyn OrganizationsApi,
    ou: &str,
    recursive: bool,
    exclude_org_mgmt_acct: ExcludeOrgMgmt,
    cache: &LookupCache,
) -> Result<Vec<OrgAccount>> {
    let org_mgmt_acct = match exclude_org_mgmt_acct {
        ExcludeOrgMgmt::No => None,
        ExcludeOrgMgmt::AccountId(id) => Some(format_account_id(&id)),
        ExcludeOrgMgmt::Lookup => {
            let organization = orgs.describe_organization().await?;
            Some(organization.master_account_id)
        }
    };

    accounts_for_ou(orgs, ou.to_string(), recursive, org_mgmt_acct, cache).await
}

fn accounts_for_ou<'a>(
    orgs: &'a dyn OrganizationsApi,
    ou: String,
    recursive: bool,
    org_mgmt_acct: Option<String>,
    cache: &'a LookupCache,
) -> BoxFuture<'a, Result<Vec<OrgAccount>>> {
    async move {
        let ou_kind = if ou.starts_with("r-") { "root" } else { "OU" };
        let accounts_key = format!("{}#accounts", ou);
        let children_key = format!("{}#children", ou);

        let direct = match cache.get(&accounts_key) {
            Some(CacheEntry::Accounts(accounts)) => {
                tracing::debug!(ou = %ou, count = accounts.len(), "Loaded cached accounts");
                accounts
            }
            _ => {
                tracing::info!(kind = ou_kind, ou = %ou, "Retrieving accounts");
                let accounts = orgs.list_accounts_for_parent(&ou).await?;
                cache.insert(accounts_key, CacheEntry::Accounts(accounts.clone()));
                accounts
            }
        };

        let mut result: Vec<OrgAccount> = direct
            .into_iter()
            .filter(|account| org_mgmt_acct.as_deref() != Some(account.id.as_str()))
            .collect();

        if recursive {
            let children = match cache.get(&children_key) {
                Some(CacheEntry::Children(children)) => {
                    tracing::debug!(ou = %ou, count = children.len(), "Loaded cached child OUs");
                    children
                }
                _ => {
                    tracing::info!(kind = ou_kind, ou = %ou, "Processing child OUs");
                    let children: Vec<String> = orgs
                        .list_organizational_units_for_parent(&ou)
                        .await?
                        .into_iter()
                        .map(|unit| unit.id)
                        .collect();
                    cache.insert(children_key, CacheEntry::Children(children.clone()));
                    children
                }
            };

            for child in children {
                let nested =
                    accounts_for_ou(orgs, child, true, org_mgmt_acct.clone(), cache).await?;
                result.extend(nested);
            }
        }

        Ok(result)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::orgs::{Organization, OrgUnit};
    use crate::errors::SsopulseError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Root r-root: accounts A1, A2; child OU ou-sub with account A3
    struct FakeOrgs {
        list_calls: AtomicUsize,
    }

    impl FakeOrgs {
        fn new() -> Self {
            Self {
                list_calls: AtomicUsize::new(0),
            }
        }
    }

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
            Ok(vec![])
        }

        async fn list_accounts_for_parent(&self, parent_id: &str) -> Result<Vec<OrgAccount>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            match parent_id {
                "r-root" => Ok(vec![
                    account("111111111111", "A1"),
                    account("222222222222", "A2"),
                ]),
                "ou-root-subsub01" => Ok(vec![account("333333333333", "A3")]),
                _ => Ok(vec![]),
            }
        }

        async fn list_organizational_units_for_parent(
            &self,
            parent_id: &str,
        ) -> Result<Vec<OrgUnit>> {
            match parent_id {
                "r-root" => Ok(vec![OrgUnit {
                    id: "ou-root-subsub01".to_string(),
                    name: Some("Sub".to_string()),
                }]),
                _ => Ok(vec![]),
            }
        }

        async fn describe_account(&self, _account_id: &str) -> Result<OrgAccount> {
            Err(SsopulseError::Lookup("not used".to_string()))
        }

        async fn describe_organization(&self) -> Result<Organization> {
            Ok(Organization {
                id: "o-abc".to_string(),
                master_account_id: "111111111111".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_non_recursive_lists_direct_accounts() {
        let orgs = FakeOrgs::new();
        let cache = LookupCache::new();
        let accounts =
            lookup_accounts_for_ou(&orgs, "r-root", false, ExcludeOrgMgmt::No, &cache)
                .await
                .unwrap();
        let ids: Vec<&str> = accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["111111111111", "222222222222"]);
    }

    #[tokio::test]
    async fn test_recursive_preserves_depth_first_order() {
        let orgs = FakeOrgs::new();
        let cache = LookupCache::new();
        let accounts = lookup_accounts_for_ou(&orgs, "r-root", true, ExcludeOrgMgmt::No, &cache)
            .await
            .unwrap();
        let ids: Vec<&str> = accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["111111111111", "222222222222", "333333333333"]);
    }

    #[tokio::test]
    async fn test_caching_prevents_repeat_listing() {
        let orgs = FakeOrgs::new();
        let cache = LookupCache::new();
        lookup_accounts_for_ou(&orgs, "r-root", true, ExcludeOrgMgmt::No, &cache)
            .await
            .unwrap();
        let calls_after_first = orgs.list_calls.load(Ordering::SeqCst);
        lookup_accounts_for_ou(&orgs, "r-root", true, ExcludeOrgMgmt::No, &cache)
            .await
            .unwrap();
        assert_eq!(orgs.list_calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn test_management_account_excluded() {
        let orgs = FakeOrgs::new();
        let cache = LookupCache::new();
        let accounts =
            lookup_accounts_for_ou(&orgs, "r-root", true, ExcludeOrgMgmt::Lookup, &cache)
                .await
                .unwrap();
        let ids: Vec<&str> = accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["222222222222", "333333333333"]);
    }
}
