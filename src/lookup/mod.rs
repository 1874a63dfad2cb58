//! Identifier resolution
//!
//! Id/name lookups for principals, permission sets, and accounts, plus SSO
//! instance discovery. Lookups share a per-resolver cache keyed by
//! namespaced strings; failed lookups cache the error itself so one missing
//! identifier never re-hits the service.

pub mod ids;
pub mod ou;

pub use ids::Ids;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::aws::admin::{PermissionSetInfo, SsoAdminApi};
use crate::aws::identitystore::{GroupInfo, IdentityStoreApi, UserInfo};
use crate::aws::orgs::{OrgAccount, OrganizationsApi};
use crate::errors::{Result, SsopulseError};
use crate::format::{format_account_id, format_permission_set_arn};

/// One cached lookup result; errors are cached alongside successes.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    Group(GroupInfo),
    User(UserInfo),
    PermissionSet(PermissionSetInfo),
    Account(OrgAccount),
    Accounts(Vec<OrgAccount>),
    Children(Vec<String>),
    Error(String),
}

/// Per-resolver lookup cache; not shared across concurrent runs.
#[derive(Debug, Default)]
pub struct LookupCache {
    inner: Mutex<HashMap<String, CacheEntry>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().expect("lookup cache lock").get(key).cloned()
    }

    pub fn insert(&self, key: String, entry: CacheEntry) {
        self.inner.lock().expect("lookup cache lock").insert(key, entry);
    }
}

fn cached_error(cache: &LookupCache, key: &str, message: String) -> SsopulseError {
    cache.insert(key.to_string(), CacheEntry::Error(message.clone()));
    SsopulseError::Lookup(message)
}

fn is_not_found(error: &SsopulseError) -> bool {
    error.is_service_error("ResourceNotFoundException")
        || error.is_service_error("AccountNotFoundException")
}

pub async fn lookup_group_by_id(
    store: &dyn IdentityStoreApi,
    ids: &Ids,
    group_id: &str,
    cache: &LookupCache,
) -> Result<GroupInfo> {
    let key_id = format!("group#id#{}", group_id);
    match cache.get(&key_id) {
        Some(CacheEntry::Group(group)) => return Ok(group),
        Some(CacheEntry::Error(message)) => return Err(SsopulseError::Lookup(message)),
        _ => {}
    }

    tracing::debug!(group_id, "Looking up group");
    let identity_store_id = ids.identity_store_id().await?;
    let group = match store.describe_group(&identity_store_id, group_id).await {
        Ok(group) => group,
        Err(e) if is_not_found(&e) => {
            return Err(cached_error(cache, &key_id, e.to_string()));
        }
        Err(e) => return Err(e),
    };

    cache.insert(key_id, CacheEntry::Group(group.clone()));
    cache.insert(
        format!("group#name#{}", group.display_name),
        CacheEntry::Group(group.clone()),
    );
    Ok(group)
}

pub async fn lookup_group_by_name(
    store: &dyn IdentityStoreApi,
    ids: &Ids,
    group_name: &str,
    cache: &LookupCache,
) -> Result<GroupInfo> {
    let key_name = format!("group#name#{}", group_name);
    match cache.get(&key_name) {
        Some(CacheEntry::Group(group)) => return Ok(group),
        Some(CacheEntry::Error(message)) => return Err(SsopulseError::Lookup(message)),
        _ => {}
    }

    tracing::debug!(group_name, "Looking up group");
    let identity_store_id = ids.identity_store_id().await?;
    let groups = store
        .list_groups_by_name(&identity_store_id, group_name)
        .await?;

    let group = match groups.len() {
        0 => {
            return Err(cached_error(
                cache,
                &key_name,
                format!("No group named {} found", group_name),
            ))
        }
        1 => groups.into_iter().next().unwrap(),
        n => {
            return Err(cached_error(
                cache,
                &key_name,
                format!("{} groups named {} found", n, group_name),
            ))
        }
    };

    cache.insert(
        format!("group#id#{}", group.group_id),
        CacheEntry::Group(group.clone()),
    );
    cache.insert(key_name, CacheEntry::Group(group.clone()));
    Ok(group)
}

pub async fn lookup_user_by_id(
    store: &dyn IdentityStoreApi,
    ids: &Ids,
    user_id: &str,
    cache: &LookupCache,
) -> Result<UserInfo> {
    let key_id = format!("user#id#{}", user_id);
    match cache.get(&key_id) {
        Some(CacheEntry::User(user)) => return Ok(user),
        Some(CacheEntry::Error(message)) => return Err(SsopulseError::Lookup(message)),
        _ => {}
    }

    tracing::debug!(user_id, "Looking up user");
    let identity_store_id = ids.identity_store_id().await?;
    let user = match store.describe_user(&identity_store_id, user_id).await {
        Ok(user) => user,
        Err(e) if is_not_found(&e) => {
            return Err(cached_error(cache, &key_id, e.to_string()));
        }
        Err(e) => return Err(e),
    };

    cache.insert(key_id, CacheEntry::User(user.clone()));
    cache.insert(
        format!("user#name#{}", user.user_name),
        CacheEntry::User(user.clone()),
    );
    Ok(user)
}

pub async fn lookup_user_by_name(
    store: &dyn IdentityStoreApi,
    ids: &Ids,
    user_name: &str,
    cache: &LookupCache,
) -> Result<UserInfo> {
    let key_name = format!("user#name#{}", user_name);
    match cache.get(&key_name) {
        Some(CacheEntry::User(user)) => return Ok(user),
        Some(CacheEntry::Error(message)) => return Err(SsopulseError::Lookup(message)),
        _ => {}
    }

    tracing::debug!(user_name, "Looking up user");
    let identity_store_id = ids.identity_store_id().await?;
    let users = store
        .list_users_by_name(&identity_store_id, user_name)
        .await?;

    let user = match users.len() {
        0 => {
            return Err(cached_error(
                cache,
                &key_name,
                format!("No user named {} found", user_name),
            ))
        }
        1 => users.into_iter().next().unwrap(),
        n => {
            return Err(cached_error(
                cache,
                &key_name,
                format!("{} users named {} found", n, user_name),
            ))
        }
    };

    cache.insert(
        format!("user#id#{}", user.user_id),
        CacheEntry::User(user.clone()),
    );
    cache.insert(key_name, CacheEntry::User(user.clone()));
    Ok(user)
}

pub async fn lookup_permission_set_by_id(
    admin: &dyn SsoAdminApi,
    ids: &Ids,
    permission_set_id: &str,
    cache: &LookupCache,
) -> Result<PermissionSetInfo> {
    let instance_id = ids.instance_id().await?;
    let permission_set_arn = format_permission_set_arn(&instance_id, permission_set_id)?;

    let key_arn = format!("ps#arn#{}", permission_set_arn);
    match cache.get(&key_arn) {
        Some(CacheEntry::PermissionSet(ps)) => return Ok(ps),
        Some(CacheEntry::Error(message)) => return Err(SsopulseError::Lookup(message)),
        _ => {}
    }

    tracing::debug!(permission_set_id, "Looking up permission set");
    let instance_arn = ids.instance_arn().await?;
    let ps = match admin
        .describe_permission_set(&instance_arn, &permission_set_arn)
        .await
    {
        Ok(ps) => ps,
        Err(e) if is_not_found(&e) => {
            return Err(cached_error(cache, &key_arn, e.to_string()));
        }
        Err(e) => return Err(e),
    };

    cache.insert(key_arn, CacheEntry::PermissionSet(ps.clone()));
    cache.insert(
        format!("ps#name#{}", ps.name),
        CacheEntry::PermissionSet(ps.clone()),
    );
    Ok(ps)
}

pub async fn lookup_permission_set_by_name(
    admin: &dyn SsoAdminApi,
    ids: &Ids,
    permission_set_name: &str,
    cache: &LookupCache,
) -> Result<PermissionSetInfo> {
    let key_name = format!("ps#name#{}", permission_set_name);
    match cache.get(&key_name) {
        Some(CacheEntry::PermissionSet(ps)) => return Ok(ps),
        Some(CacheEntry::Error(message)) => return Err(SsopulseError::Lookup(message)),
        _ => {}
    }

    tracing::debug!(permission_set_name, "Looking up permission set");
    let instance_arn = ids.instance_arn().await?;
    let mut found = None;
    for permission_set_arn in admin.list_permission_sets(&instance_arn).await? {
        let ps = admin
            .describe_permission_set(&instance_arn, &permission_set_arn)
            .await?;
        cache.insert(
            format!("ps#arn#{}", permission_set_arn),
            CacheEntry::PermissionSet(ps.clone()),
        );
        cache.insert(
            format!("ps#name#{}", ps.name),
            CacheEntry::PermissionSet(ps.clone()),
        );
        if ps.name == permission_set_name {
            found = Some(ps);
            break;
        }
    }

    found.ok_or_else(|| {
        cached_error(
            cache,
            &key_name,
            format!("No permission set named {} found", permission_set_name),
        )
    })
}

pub async fn lookup_account_by_id(
    orgs: &dyn OrganizationsApi,
    account_id: &str,
    cache: &LookupCache,
) -> Result<OrgAccount> {
    let account_id = format_account_id(account_id);
    let key_id = format!("account#id#{}", account_id);
    match cache.get(&key_id) {
        Some(CacheEntry::Account(account)) => return Ok(account),
        Some(CacheEntry::Error(message)) => return Err(SsopulseError::Lookup(message)),
        _ => {}
    }

    tracing::debug!(account_id = %account_id, "Looking up account");
    let account = match orgs.describe_account(&account_id).await {
        Ok(account) => account,
        Err(e) if is_not_found(&e) => {
            return Err(cached_error(cache, &key_id, e.to_string()));
        }
        Err(e) => return Err(e),
    };

    cache.insert(key_id, CacheEntry::Account(account.clone()));
    if let Some(name) = &account.name {
        cache.insert(
            format!("account#name#{}", name),
            CacheEntry::Account(account.clone()),
        );
    }
    Ok(account)
}

pub async fn lookup_account_by_name(
    orgs: &dyn OrganizationsApi,
    account_name: &str,
    cache: &LookupCache,
) -> Result<OrgAccount> {
    let key_name = format!("account#name#{}", account_name);
    match cache.get(&key_name) {
        Some(CacheEntry::Account(account)) => return Ok(account),
        Some(CacheEntry::Error(message)) => return Err(SsopulseError::Lookup(message)),
        _ => {}
    }

    tracing::debug!(account_name, "Looking up account");
    let mut found = None;
    for account in orgs.list_accounts().await? {
        cache.insert(
            format!("account#id#{}", account.id),
            CacheEntry::Account(account.clone()),
        );
        if let Some(name) = &account.name {
            cache.insert(
                format!("account#name#{}", name),
                CacheEntry::Account(account.clone()),
            );
            if name == account_name {
                found = Some(account);
            }
        }
    }

    found.ok_or_else(|| {
        cached_error(
            cache,
            &key_name,
            format!("No account named {} found", account_name),
        )
    })
}
