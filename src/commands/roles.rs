//! The roles command
//!
//! Lists the accounts and roles the logged-in user can access through a
//! session, one separator-joined row per role.

use crate::aws::portal::PortalClient;
use crate::cli::args::RolesArgs;
use crate::config_file::AwsConfig;
use crate::discovery::{resolve_sessions, SessionSelection};
use crate::errors::Result;
use crate::format::format_account_id;

pub async fn run(args: &RolesArgs) -> Result<()> {
    let selection = SessionSelection {
        specifier: args.specifier.clone(),
        sso_region: args.sso_region.clone(),
        profile_name: args.profile.clone(),
        session_name: args.sso_session.clone(),
        ..Default::default()
    };
    let sessions = resolve_sessions(&selection, AwsConfig::load)?;
    let session = &sessions[0];

    let engine = super::token_engine(&session.region, true, None)?;
    let session_name = if session.is_inline() {
        None
    } else {
        Some(session.session_name.as_str())
    };
    let token = engine
        .fetch_token(
            &session.start_url,
            session_name,
            session.registration_scopes.as_deref(),
            false,
        )
        .await?;

    let portal = PortalClient::new(&session.region);

    // Explicit accounts skip the listing; their names are unknown
    let accounts: Vec<(String, String)> = if args.account_id.is_empty() {
        portal
            .list_accounts(&token.access_token)
            .await?
            .into_iter()
            .map(|account| (account.account_id, account.account_name))
            .collect()
    } else {
        args.account_id
            .iter()
            .map(|id| (format_account_id(id), "UNKNOWN".to_string()))
            .collect()
    };

    println!("{}", ["account_id", "account_name", "role_name"].join(&args.separator));
    for (account_id, account_name) in accounts {
        let roles = portal
            .list_account_roles(&token.access_token, &account_id)
            .await?;
        for role in roles {
            println!(
                "{}",
                [account_id.as_str(), account_name.as_str(), role.role_name.as_str()]
                    .join(&args.separator)
            );
        }
    }

    Ok(())
}
