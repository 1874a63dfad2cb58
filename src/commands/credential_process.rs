//! The credential-process command
//!
//! Writes exactly one JSON object to stdout in the credential-process
//! protocol. Configuration precedence is CLI flags, then environment
//! variables, then the named profile.

use indexmap::IndexMap;

use crate::cli::args::CredentialProcessArgs;
use crate::config_file::AwsConfig;
use crate::errors::{Result, SsopulseError};

/// Environment variable enabling the debug log file
pub const DEBUG_VAR: &str = "AWS_SSO_CREDENTIAL_PROCESS_DEBUG";

/// The debug log file location
pub fn log_file_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|h| {
        h.join(".aws")
            .join("sso")
            .join("aws-sso-credential-process-log.txt")
    })
}

/// Whether debug logging to the log file is enabled.
pub fn debug_enabled(args: &CredentialProcessArgs) -> bool {
    args.debug
        || std::env::var(DEBUG_VAR)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false)
}

/// Friendly name and config key for each required setting.
const CONFIG_VARS: &[(&str, &str)] = &[
    ("start url", "sso_start_url"),
    ("SSO region", "sso_region"),
    ("account", "sso_account_id"),
    ("role", "sso_role_name"),
];

/// Merge argument and profile configuration; arguments win per key.
pub fn get_config(
    arg_config: &IndexMap<&str, Option<String>>,
    profile_config: &IndexMap<String, String>,
) -> Result<IndexMap<&'static str, String>> {
    let mut sso_config = IndexMap::new();
    let mut missing = Vec::new();

    for (friendly_name, key) in CONFIG_VARS {
        if let Some(Some(value)) = arg_config.get(key) {
            sso_config.insert(*key, value.clone());
        } else if let Some(value) = profile_config.get(*key) {
            sso_config.insert(*key, value.clone());
        } else {
            missing.push(*friendly_name);
        }
    }

    if !missing.is_empty() {
        return Err(SsopulseError::InvalidSsoConfig(format!(
            "Missing {}",
            missing.join(", ")
        )));
    }

    Ok(sso_config)
}

pub async fn run(args: &CredentialProcessArgs) -> Result<()> {
    tracing::info!("Starting credential process");

    let arg_config: IndexMap<&str, Option<String>> = IndexMap::from([
        ("sso_start_url", args.start_url.clone()),
        ("sso_region", args.region.clone()),
        ("sso_account_id", args.account_id.clone()),
        ("sso_role_name", args.role_name.clone()),
    ]);
    tracing::debug!(?arg_config, "Config from args");

    let profile_config = match &args.profile {
        Some(profile) => {
            let config = AwsConfig::load()?;
            let section = config.profiles.get(profile).cloned().ok_or_else(|| {
                SsopulseError::ConfigProfile(format!("Profile {} not found", profile))
            })?;
            tracing::debug!(?section, "Config from profile");
            section
        }
        None => IndexMap::new(),
    };

    let config = get_config(&arg_config, &profile_config)?;
    tracing::debug!(?config, "Effective config");

    let start_url = &config["sso_start_url"];
    let sso_region = &config["sso_region"];

    let token_engine = super::token_engine(sso_region, false, None)?;
    let credential_engine = super::credential_engine(sso_region)?;

    let credentials = credential_engine
        .get_credentials(
            &token_engine,
            start_url,
            None,
            &config["sso_account_id"],
            &config["sso_role_name"],
            args.force_refresh,
        )
        .await;

    let credentials = match credentials {
        Ok(credentials) => credentials,
        Err(e @ SsopulseError::AuthenticationNeeded)
        | Err(e @ SsopulseError::UnauthorizedSsoToken(_)) => {
            let login_hint = match &args.profile {
                Some(profile) => format!("ssopulse login --profile {}", profile),
                None => format!("ssopulse login {} {}", start_url, sso_region),
            };
            eprintln!("Login required. Use `{}` and try again.", login_hint);
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let output = serde_json::json!({
        "Version": 1,
        "AccessKeyId": credentials.access_key_id,
        "SecretAccessKey": credentials.secret_access_key,
        "SessionToken": credentials.session_token,
        "Expiration": credentials.expiration,
    });

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}
