//! The login command

use chrono::Local;

use crate::cli::args::LoginArgs;
use crate::config_file::AwsConfig;
use crate::discovery::{resolve_sessions, SessionSelection};
use crate::errors::Result;
use crate::token::cache::parse_timestamp;

/// Environment variables providing login-command defaults
pub const LOGIN_DEFAULT_START_URL_VARS: &[&str] = &["AWS_SSO_LOGIN_DEFAULT_SSO_START_URL"];
pub const LOGIN_DEFAULT_SSO_REGION_VARS: &[&str] = &["AWS_SSO_LOGIN_DEFAULT_SSO_REGION"];

pub const LOGIN_ALL_VAR: &str = "AWS_SSO_LOGIN_ALL";

pub async fn run(args: &LoginArgs) -> Result<()> {
    let login_all = args.login_all
        || std::env::var(LOGIN_ALL_VAR)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false);

    let selection = SessionSelection {
        specifier: args.specifier.clone(),
        sso_region: args.sso_region.clone(),
        profile_name: args.profile.clone(),
        session_name: args.sso_session.clone(),
        login_all,
        default_start_url_vars: LOGIN_DEFAULT_START_URL_VARS.to_vec(),
        default_region_vars: LOGIN_DEFAULT_SSO_REGION_VARS.to_vec(),
    };

    let sessions = resolve_sessions(&selection, AwsConfig::load)?;

    if sessions.len() > 1 {
        tracing::info!(count = sessions.len(), "Logging in multiple sessions");
    }

    let headless = if args.headless { Some(true) } else { None };

    for session in &sessions {
        if session.is_inline() {
            eprintln!("Logging in {}", session.start_url);
        } else {
            eprintln!("Logging in {} ({})", session.session_name, session.start_url);
        }

        let engine = super::token_engine(&session.region, true, headless)?;
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
                args.force,
            )
            .await?;

        let expiration = parse_timestamp(&token.expires_at)?;
        let local_expiration = expiration.with_timezone(&Local);
        eprintln!(
            "Login succeeded, valid until {}",
            local_expiration.format("%Y-%m-%d %H:%M %Z")
        );
    }

    Ok(())
}
