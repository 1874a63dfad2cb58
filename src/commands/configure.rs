//! The configure-profile command

use indexmap::IndexMap;

use crate::cli::args::ConfigureProfileArgs;
use crate::config_file::writer::{
    write_profile, ProfileValues, DISABLE_CREDENTIAL_PROCESS_VAR,
};
use crate::config_file::{config_file_path, AwsConfig};
use crate::discovery::{resolve_sessions, SessionSelection};
use crate::errors::{Result, SsopulseError};

/// Environment variables providing configure-command defaults
pub const CONFIGURE_DEFAULT_START_URL_VARS: &[&str] =
    &["AWS_CONFIGURE_SSO_DEFAULT_SSO_START_URL"];
pub const CONFIGURE_DEFAULT_SSO_REGION_VARS: &[&str] = &["AWS_CONFIGURE_SSO_DEFAULT_SSO_REGION"];

pub async fn run(args: &ConfigureProfileArgs) -> Result<()> {
    let selection = SessionSelection {
        specifier: args.sso_start_url.clone(),
        sso_region: args.sso_region.clone(),
        default_start_url_vars: CONFIGURE_DEFAULT_START_URL_VARS.to_vec(),
        default_region_vars: CONFIGURE_DEFAULT_SSO_REGION_VARS.to_vec(),
        ..Default::default()
    };
    let sessions = resolve_sessions(&selection, AwsConfig::load)?;
    let session = &sessions[0];

    let account = args.account.as_ref().ok_or_else(|| {
        SsopulseError::InvalidSsoConfig("Missing account id, use --account-id".to_string())
    })?;
    let role = args.role.as_ref().ok_or_else(|| {
        SsopulseError::InvalidSsoConfig("Missing role name, use --role-name".to_string())
    })?;

    let credential_process = match args.credential_process {
        Some(explicit) => explicit,
        None => !std::env::var(DISABLE_CREDENTIAL_PROCESS_VAR)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false),
    };

    let values = ProfileValues {
        sso_start_url: Some(session.start_url.clone()),
        sso_region: Some(session.region.clone()),
        sso_account_id: Some(crate::format::format_account_id(account)),
        sso_role_name: Some(role.clone()),
        region: args.region.clone(),
        output: args.output.clone(),
        credential_process,
        ..Default::default()
    };

    let mut defaults = IndexMap::new();
    for entry in &args.config_default {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(SsopulseError::Argument(format!(
                "Config default {} is not KEY=VALUE",
                entry
            )));
        };
        defaults.insert(key.trim().to_lowercase(), value.trim().to_string());
    }

    let path = config_file_path()?;
    write_profile(
        &path,
        &args.profile,
        &values,
        &defaults,
        args.existing_config_action,
    )?;

    eprintln!("Wrote profile {} to {}", args.profile, path.display());
    Ok(())
}
