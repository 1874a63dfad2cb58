//! Assignment expansion
//!
//! Expands principal/permission-set/target specifications into the flat
//! stream of account assignments the service models one-by-one. Emission
//! order is target-outer, permission-set-middle, principal-inner, following
//! the service's listing order; no sort is applied.

use std::collections::HashMap;

use async_stream::try_stream;
use futures::Stream;

use crate::aws::admin::SsoAdminApi;
use crate::aws::identitystore::IdentityStoreApi;
use crate::aws::orgs::OrganizationsApi;
use crate::errors::{Result, SsopulseError};
use crate::format::{format_account_id, format_permission_set_arn, is_account_id, is_ou_id};
use crate::lookup::ou::{lookup_accounts_for_ou, ExcludeOrgMgmt};
use crate::lookup::{Ids, LookupCache};

pub const TARGET_TYPE_ACCOUNT: &str = "AWS_ACCOUNT";
pub const TARGET_TYPE_OU: &str = "AWS_OU";

/// One expanded assignment tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub instance_arn: String,
    pub principal_type: String,
    pub principal_id: String,
    pub principal_name: Option<String>,
    pub permission_set_arn: String,
    pub permission_set_name: Option<String>,
    pub target_type: String,
    pub target_id: String,
    pub target_name: Option<String>,
}

/// A principal specification: a bare id matches any principal type.
#[derive(Debug, Clone)]
pub enum PrincipalSpec {
    Any(String),
    Group(String),
    User(String),
}

impl PrincipalSpec {
    fn matcher(&self) -> (Option<&'static str>, &str) {
        match self {
            PrincipalSpec::Any(id) => (None, id),
            PrincipalSpec::Group(id) => (Some("GROUP"), id),
            PrincipalSpec::User(id) => (Some("USER"), id),
        }
    }
}

/// A target specification before normalization.
#[derive(Debug, Clone)]
pub enum TargetSpec {
    Account(String),
    Ou(String),
}

/// Normalize a raw target string: digits are an account id (padded to 12),
/// root/OU ids pass through, anything else is malformed.
pub fn normalize_target(raw: &str) -> Result<TargetSpec> {
    if is_account_id(raw) {
        Ok(TargetSpec::Account(format_account_id(raw)))
    } else if is_ou_id(raw) {
        Ok(TargetSpec::Ou(raw.to_string()))
    } else {
        Err(SsopulseError::Format(format!("Invalid target {}", raw)))
    }
}

pub type TargetFilter = Box<dyn Fn(&str, &str, Option<&str>) -> bool + Send + Sync>;
pub type PermissionSetFilter = Box<dyn Fn(&str, Option<&str>) -> bool + Send + Sync>;
pub type PrincipalFilter = Box<dyn Fn(&str, &str, Option<&str>) -> bool + Send + Sync>;

/// Expansion inputs and switches
#[derive(Default)]
pub struct ResolverOptions {
    /// Principals to accept; `None` accepts every listed principal
    pub principals: Option<Vec<PrincipalSpec>>,
    /// Permission sets in any accepted id form; `None` means all provisioned
    pub permission_sets: Option<Vec<String>>,
    /// Targets; `None` iterates every account in the organization
    pub targets: Option<Vec<TargetSpec>>,
    pub principal_filter: Option<PrincipalFilter>,
    pub permission_set_filter: Option<PermissionSetFilter>,
    pub target_filter: Option<TargetFilter>,
    pub get_principal_names: bool,
    pub get_permission_set_names: bool,
    pub get_target_names: bool,
    /// Fan OU targets out through child OUs
    pub ou_recursive: bool,
}

/// A target after expansion: always a concrete account.
#[derive(Debug, Clone)]
struct ResolvedTarget {
    id: String,
    name: Option<String>,
}

/// Lazily expand assignments for the given options.
///
/// The service clients buffer paginator pages internally, but levels are
/// only consulted as the stream is pulled, so the documented emission order
/// is preserved without materializing the full cross product.
pub fn list_assignments<'a>(
    admin: &'a dyn SsoAdminApi,
    identity_store: &'a dyn IdentityStoreApi,
    orgs: &'a dyn OrganizationsApi,
    ids: &'a Ids,
    options: &'a ResolverOptions,
) -> impl Stream<Item = Result<Assignment>> + 'a {
    try_stream! {
        let instance_arn = ids.instance_arn().await?;
        let identity_store_id = ids.identity_store_id().await?;
        let instance_id = ids.instance_id().await?;

        let principal_matchers: Option<Vec<(Option<&str>, &str)>> = options
            .principals
            .as_ref()
            .map(|specs| specs.iter().map(PrincipalSpec::matcher).collect());

        let permission_set_arns: Option<Vec<String>> = match &options.permission_sets {
            Some(raw) => Some(
                raw.iter()
                    .map(|ps| format_permission_set_arn(&instance_id, ps))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        let ou_cache = LookupCache::new();
        let mut ps_name_cache: HashMap<String, Option<String>> = HashMap::new();
        let mut principal_name_cache: HashMap<(String, String), Option<String>> = HashMap::new();
        let mut filter_cache: HashMap<String, bool> = HashMap::new();

        let targets = resolve_targets(orgs, options, &ou_cache, &mut filter_cache).await?;

        for target in targets {
            tracing::debug!(account_id = %target.id, "Visiting target");

            let arns_for_target: Vec<String> = match &permission_set_arns {
                Some(arns) => arns.clone(),
                None => {
                    admin
                        .list_permission_sets_provisioned_to_account(&instance_arn, &target.id)
                        .await?
                }
            };

            for permission_set_arn in arns_for_target {
                let permission_set_name = if options.get_permission_set_names {
                    match ps_name_cache.get(&permission_set_arn) {
                        Some(name) => name.clone(),
                        None => {
                            let name = admin
                                .describe_permission_set(&instance_arn, &permission_set_arn)
                                .await
                                .map(|ps| ps.name)
                                .ok();
                            ps_name_cache.insert(permission_set_arn.clone(), name.clone());
                            name
                        }
                    }
                } else {
                    None
                };

                let ps_allowed = match &options.permission_set_filter {
                    None => true,
                    Some(filter) => *filter_cache
                        .entry(format!("ps#{}", permission_set_arn))
                        .or_insert_with(|| {
                            filter(&permission_set_arn, permission_set_name.as_deref())
                        }),
                };
                if !ps_allowed {
                    tracing::debug!(arn = %permission_set_arn, "Permission set is filtered");
                    continue;
                }

                let account_assignments = admin
                    .list_account_assignments(&instance_arn, &target.id, &permission_set_arn)
                    .await?;

                for account_assignment in account_assignments {
                    let principal_type = account_assignment.principal_type;
                    let principal_id = account_assignment.principal_id;

                    if let Some(matchers) = &principal_matchers {
                        let matched = matchers.iter().any(|(matcher_type, matcher_id)| {
                            (matcher_type.is_none()
                                || *matcher_type == Some(principal_type.as_str()))
                                && *matcher_id == principal_id
                        });
                        if !matched {
                            tracing::debug!(
                                "Principal {}:{} does not match principals",
                                principal_type,
                                principal_id
                            );
                            continue;
                        }
                    }

                    let principal_name = if options.get_principal_names {
                        let cache_key = (principal_type.clone(), principal_id.clone());
                        match principal_name_cache.get(&cache_key) {
                            Some(name) => name.clone(),
                            None => {
                                let name = describe_principal_name(
                                    identity_store,
                                    &identity_store_id,
                                    &principal_type,
                                    &principal_id,
                                )
                                .await?;
                                principal_name_cache.insert(cache_key, name.clone());
                                name
                            }
                        }
                    } else {
                        None
                    };

                    let principal_allowed = match &options.principal_filter {
                        None => true,
                        Some(filter) => *filter_cache
                            .entry(format!("principal#{}#{}", principal_type, principal_id))
                            .or_insert_with(|| {
                                filter(&principal_type, &principal_id, principal_name.as_deref())
                            }),
                    };
                    if !principal_allowed {
                        tracing::debug!(
                            "Principal is filtered: {}:{}",
                            principal_type,
                            principal_id
                        );
                        continue;
                    }

                    let assignment = Assignment {
                        instance_arn: instance_arn.clone(),
                        principal_type,
                        principal_id,
                        principal_name,
                        permission_set_arn: permission_set_arn.clone(),
                        permission_set_name: permission_set_name.clone(),
                        target_type: TARGET_TYPE_ACCOUNT.to_string(),
                        target_id: target.id.clone(),
                        target_name: target.name.clone(),
                    };
                    tracing::debug!(?assignment, "Visiting assignment");
                    yield assignment;
                }
            }
        }
    }
}

/// Collect the full expansion; mostly a convenience for callers and tests.
pub async fn collect_assignments(
    admin: &dyn SsoAdminApi,
    identity_store: &dyn IdentityStoreApi,
    orgs: &dyn OrganizationsApi,
    ids: &Ids,
    options: &ResolverOptions,
) -> Result<Vec<Assignment>> {
    use futures::TryStreamExt;
    let stream = list_assignments(admin, identity_store, orgs, ids, options);
    futures::pin_mut!(stream);
    stream.try_collect().await
}

async fn describe_principal_name(
    identity_store: &dyn IdentityStoreApi,
    identity_store_id: &str,
    principal_type: &str,
    principal_id: &str,
) -> Result<Option<String>> {
    let not_found = |e: &SsopulseError| e.is_service_error("ResourceNotFoundException");
    match principal_type {
        "GROUP" => match identity_store.describe_group(identity_store_id, principal_id).await {
            Ok(group) => Ok(Some(group.display_name)),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(e),
        },
        "USER" => match identity_store.describe_user(identity_store_id, principal_id).await {
            Ok(user) => Ok(Some(user.user_name)),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(e),
        },
        other => Err(SsopulseError::Format(format!(
            "Unknown principal type {}",
            other
        ))),
    }
}

/// Expand the target specifications into concrete accounts, applying the
/// target filter (memoized per account id).
async fn resolve_targets(
    orgs: &dyn OrganizationsApi,
    options: &ResolverOptions,
    ou_cache: &LookupCache,
    filter_cache: &mut HashMap<String, bool>,
) -> Result<Vec<ResolvedTarget>> {
    let mut allowed = |id: &str, name: Option<&str>| -> bool {
        match &options.target_filter {
            None => true,
            Some(filter) => *filter_cache
                .entry(format!("target#{}", id))
                .or_insert_with(|| filter(TARGET_TYPE_ACCOUNT, id, name)),
        }
    };

    let mut targets = Vec::new();

    match &options.targets {
        Some(specs) => {
            for spec in specs {
                match spec {
                    TargetSpec::Account(id) => {
                        let name = if options.get_target_names {
                            orgs.describe_account(id).await.ok().and_then(|a| a.name)
                        } else {
                            None
                        };
                        if allowed(id, name.as_deref()) {
                            targets.push(ResolvedTarget {
                                id: id.clone(),
                                name,
                            });
                        } else {
                            tracing::debug!(account_id = %id, "Account is filtered");
                        }
                    }
                    TargetSpec::Ou(ou) => {
                        let accounts = lookup_accounts_for_ou(
                            orgs,
                            ou,
                            options.ou_recursive,
                            ExcludeOrgMgmt::No,
                            ou_cache,
                        )
                        .await?;
                        for account in accounts {
                            if allowed(&account.id, account.name.as_deref()) {
                                targets.push(ResolvedTarget {
                                    id: account.id,
                                    name: account.name,
                                });
                            } else {
                                tracing::debug!(account_id = %account.id, "Account is filtered");
                            }
                        }
                    }
                }
            }
        }
        None => {
            tracing::debug!("Iterating all accounts in the organization");
            for account in orgs.list_accounts().await? {
                if allowed(&account.id, account.name.as_deref()) {
                    targets.push(ResolvedTarget {
                        id: account.id,
                        name: account.name,
                    });
                } else {
                    tracing::debug!(account_id = %account.id, "Account is filtered");
                }
            }
        }
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_target() {
        assert!(matches!(
            normalize_target("123").unwrap(),
            TargetSpec::Account(id) if id == "000000000123"
        ));
        assert!(matches!(
            normalize_target("ou-ab12-cdef5678").unwrap(),
            TargetSpec::Ou(_)
        ));
        assert!(matches!(
            normalize_target("r-ab12").unwrap(),
            TargetSpec::Ou(_)
        ));
        assert!(normalize_target("not-a-target").is_err());
    }

    #[test]
    fn test_principal_matcher() {
        assert_eq!(PrincipalSpec::Any("p-1".to_string()).matcher(), (None, "p-1"));
        assert_eq!(
            PrincipalSpec::Group("g-1".to_string()).matcher(),
            (Some("GROUP"), "g-1")
        );
        assert_eq!(
            PrincipalSpec::User("u-1".to_string()).matcher(),
            (Some("USER"), "u-1")
        );
    }
}
