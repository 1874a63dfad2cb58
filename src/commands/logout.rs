//! The logout command
//!
//! Pops the cached token and invalidates it with the portal. Failures are
//! swallowed; logging out is best-effort by design of the service API.

use crate::aws::portal::PortalClient;
use crate::cli::args::LogoutArgs;
use crate::config_file::AwsConfig;
use crate::discovery::{resolve_sessions, Session, SessionSelection};
use crate::errors::Result;
use crate::token::FileCache;

pub async fn run(args: &LogoutArgs) -> Result<()> {
    let selection = SessionSelection {
        specifier: args.specifier.clone(),
        sso_region: args.sso_region.clone(),
        profile_name: args.profile.clone(),
        session_name: args.sso_session.clone(),
        login_all: args.logout_all,
        ..Default::default()
    };

    let sessions = resolve_sessions(&selection, AwsConfig::load)?;

    for session in &sessions {
        logout_session(session).await;
    }

    Ok(())
}

/// Log out of one session; never fails.
pub async fn logout_session(session: &Session) {
    let result = try_logout(session).await;
    match result {
        Ok(true) => eprintln!("Logged out of {}", session.start_url),
        Ok(false) => eprintln!("No login found for {}", session.start_url),
        Err(e) => {
            tracing::debug!(error = %e, "Exception during logout");
            eprintln!("Logged out of {}", session.start_url);
        }
    }
}

async fn try_logout(session: &Session) -> Result<bool> {
    let cache = FileCache::sso_token_cache()?;
    let session_name = if session.is_inline() {
        None
    } else {
        Some(session.session_name.as_str())
    };
    let key = crate::token::cache::token_cache_key(&session.start_url, session_name);

    let Some(token) = cache.pop::<crate::token::CachedToken>(&key)? else {
        return Ok(false);
    };

    let portal = PortalClient::new(&session.region);
    portal.logout(&token.access_token).await?;
    Ok(true)
}
