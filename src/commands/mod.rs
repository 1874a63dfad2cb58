//! Subcommand implementations
//!
//! Each command wires the engines to CLI arguments; the interesting logic
//! lives in the library modules.

pub mod assignments;
pub mod configure;
pub mod console;
pub mod credential_process;
pub mod login;
pub mod logout;
pub mod populate_profiles;
pub mod roles;
pub mod template;

use std::sync::Arc;

use crate::aws::admin::HttpSsoAdmin;
use crate::aws::identitystore::HttpIdentityStore;
use crate::aws::oidc::OidcClient;
use crate::aws::orgs::HttpOrganizations;
use crate::aws::portal::PortalClient;
use crate::aws::signer::AwsCredentials;
use crate::credentials::CredentialEngine;
use crate::errors::Result;
use crate::token::{FileCache, NonInteractiveAuth, OnPendingAuthorization, OpenBrowserHandler, TokenEngine};

/// Build a token engine for one SSO region.
pub fn token_engine(region: &str, interactive: bool, headless: Option<bool>) -> Result<TokenEngine> {
    let handler: Box<dyn OnPendingAuthorization> = if interactive {
        Box::new(OpenBrowserHandler::new(headless, None))
    } else {
        Box::new(NonInteractiveAuth)
    };
    Ok(TokenEngine::new(
        OidcClient::new(region),
        FileCache::sso_token_cache()?,
        handler,
    ))
}

/// Build a credential engine for one SSO region.
pub fn credential_engine(region: &str) -> Result<CredentialEngine> {
    Ok(CredentialEngine::new(
        PortalClient::new(region),
        FileCache::credentials_cache()?,
    ))
}

/// The admin-plane clients the resolver commands need.
pub struct AdminClients {
    pub admin: Arc<HttpSsoAdmin>,
    pub identity_store: Arc<HttpIdentityStore>,
    pub orgs: Arc<HttpOrganizations>,
}

/// Build admin-plane clients from ambient AWS credentials.
pub fn admin_clients(region: &str) -> Result<AdminClients> {
    let credentials = AwsCredentials::from_env()?;
    Ok(AdminClients {
        admin: Arc::new(HttpSsoAdmin::new(credentials.clone(), region)),
        identity_store: Arc::new(HttpIdentityStore::new(credentials.clone(), region)),
        orgs: Arc::new(HttpOrganizations::new(credentials)),
    })
}

/// The effective admin-plane region from the environment.
pub fn default_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-1".to_string())
}
