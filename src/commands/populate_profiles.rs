//! The configure populate-profiles command
//!
//! Writes a profile to the AWS config file for every account and role the
//! session grants access to, for each requested region. Profile names are
//! assembled from configurable components; the whole batch is applied to
//! the parsed config and written back in one atomic pass.

use clap::ValueEnum;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::aws::portal::PortalClient;
use crate::cli::args::PopulateProfilesArgs;
use crate::config_file::writer::{
    apply_profile, write_config, ProfileValues, DISABLE_CREDENTIAL_PROCESS_VAR,
};
use crate::config_file::{config_file_path, AwsConfig};
use crate::discovery::{resolve_sessions, SessionSelection};
use crate::errors::{Result, SsopulseError};

use super::configure::{CONFIGURE_DEFAULT_SSO_REGION_VARS, CONFIGURE_DEFAULT_START_URL_VARS};

/// Environment variables providing a default profile region
pub const DEFAULT_REGION_VARS: &[&str] = &["AWS_CONFIGURE_DEFAULT_REGION", "AWS_DEFAULT_REGION"];

/// Environment variable providing a default component separator
pub const PROFILE_NAME_SEPARATOR_VAR: &str = "AWS_CONFIGURE_SSO_DEFAULT_PROFILE_NAME_SEPARATOR";

pub const DEFAULT_SEPARATOR: &str = ".";
pub const DEFAULT_COMPONENTS: &str = "account_name,role_name,default_style_region";

/// Whether the first region's profiles carry the region in their name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum IncludeRegion {
    /// The first region is left off the profile name
    #[default]
    Default,
    /// Every profile name carries its region
    Always,
}

/// How regions render inside profile names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RegionStyle {
    /// Five-ish character abbreviations (us-east-2 -> usea2)
    #[default]
    Short,
    /// The full region name
    Long,
}

const KNOWN_COMPONENTS: &[&str] = &[
    "account_name",
    "account_id",
    "account_number",
    "role_name",
    "region",
    "short_region",
];

/// Abbreviate a region name (`us-east-2` -> `usea2`).
pub fn short_region(region: &str) -> String {
    fn abbreviate(direction: &str) -> &str {
        match direction {
            "north" => "no",
            "northeast" => "ne",
            "east" => "ea",
            "southeast" => "se",
            "south" => "so",
            "southwest" => "sw",
            "west" => "we",
            "northwest" => "nw",
            "central" => "ce",
            other => other,
        }
    }
    let parts: Vec<&str> = region.split('-').collect();
    match parts.as_slice() {
        [area, direction, num] => format!("{}{}{}", area, abbreviate(direction), num),
        // Partition-prefixed regions just drop the separators
        _ => region.replace('-', ""),
    }
}

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Collapse whitespace runs in account names to a single dash.
pub fn safe_account_name(name: &str) -> String {
    WHITESPACE_RE.replace_all(name, "-").into_owned()
}

/// Assembles profile names from the configured components.
#[derive(Debug)]
pub struct ProfileNameFormatter {
    components: Vec<String>,
    separator: String,
    include_region: IncludeRegion,
    trim_account_name: Vec<Regex>,
    trim_role_name: Vec<Regex>,
}

impl ProfileNameFormatter {
    pub fn new(
        components: &str,
        separator: &str,
        include_region: IncludeRegion,
        region_style: RegionStyle,
        trim_account_name_patterns: &[String],
        trim_role_name_patterns: &[String],
    ) -> Result<Self> {
        let components = components
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| match c {
                "default_style_region" => match region_style {
                    RegionStyle::Short => "short_region".to_string(),
                    RegionStyle::Long => "region".to_string(),
                },
                other => other.to_string(),
            })
            .collect::<Vec<_>>();
        if components.is_empty() {
            return Err(SsopulseError::Argument(
                "Profile name components must not be empty".to_string(),
            ));
        }

        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        SsopulseError::Argument(format!("Invalid trim pattern {}: {}", p, e))
                    })
                })
                .collect()
        };

        Ok(Self {
            components,
            separator: separator.to_string(),
            include_region,
            trim_account_name: compile(trim_account_name_patterns)?,
            trim_role_name: compile(trim_role_name_patterns)?,
        })
    }

    /// Build the profile name for the `region_index`th region.
    pub fn format(
        &self,
        region_index: usize,
        account_name: &str,
        account_id: &str,
        role_name: &str,
        region: &str,
    ) -> String {
        let mut account_name = account_name.to_string();
        for pattern in &self.trim_account_name {
            account_name = pattern.replace_all(&account_name, "").into_owned();
        }
        let mut role_name = role_name.to_string();
        for pattern in &self.trim_role_name {
            role_name = pattern.replace_all(&role_name, "").into_owned();
        }

        let skip_region =
            region_index == 0 && self.include_region == IncludeRegion::Default;

        self.components
            .iter()
            .filter(|c| !(skip_region && matches!(c.as_str(), "region" | "short_region")))
            .map(|c| match c.as_str() {
                "account_name" => account_name.clone(),
                "account_id" | "account_number" => account_id.to_string(),
                "role_name" => role_name.clone(),
                "region" => region.to_string(),
                "short_region" => short_region(region),
                // Unknown components pass through literally
                literal => literal.to_string(),
            })
            .collect::<Vec<_>>()
            .join(&self.separator)
    }
}

struct ProfileConfig {
    profile_name: String,
    account_name: String,
    account_id: String,
    role_name: String,
    region: String,
}

pub async fn run(args: &PopulateProfilesArgs) -> Result<()> {
    let selection = SessionSelection {
        specifier: args.sso_start_url.clone(),
        sso_region: args.sso_region.clone(),
        default_start_url_vars: CONFIGURE_DEFAULT_START_URL_VARS.to_vec(),
        default_region_vars: CONFIGURE_DEFAULT_SSO_REGION_VARS.to_vec(),
        ..Default::default()
    };
    let sessions = resolve_sessions(&selection, AwsConfig::load)?;
    let session = &sessions[0];

    let mut regions = args.region.clone();
    if regions.is_empty() {
        for var in DEFAULT_REGION_VARS {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    tracing::debug!(region = %value, var, "Using default region");
                    regions.push(value);
                    break;
                }
            }
        }
    }
    if regions.is_empty() {
        return Err(SsopulseError::Argument(
            "Missing arguments: --region".to_string(),
        ));
    }

    let separator = match &args.separator {
        Some(separator) => separator.clone(),
        None => std::env::var(PROFILE_NAME_SEPARATOR_VAR)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SEPARATOR.to_string()),
    };

    let formatter = ProfileNameFormatter::new(
        &args.components,
        &separator,
        args.include_region,
        args.region_style,
        &args.trim_account_name,
        &args.trim_role_name,
    )?;

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

    let credential_process = match args.credential_process {
        Some(explicit) => explicit,
        None => !std::env::var(DISABLE_CREDENTIAL_PROCESS_VAR)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false),
    };

    let engine = super::token_engine(&session.region, true, None)?;
    let session_name = if session.is_inline() {
        None
    } else {
        Some(session.session_name.as_str())
    };
    tracing::info!(start_url = %session.start_url, "Logging in");
    let token = engine
        .fetch_token(
            &session.start_url,
            session_name,
            session.registration_scopes.as_deref(),
            args.force_refresh,
        )
        .await?;

    tracing::info!("Gathering accounts and roles");
    let portal = PortalClient::new(&session.region);
    let accounts = portal.list_accounts(&token.access_token).await?;

    let mut configs = Vec::new();
    for account in &accounts {
        // Accounts can lack a name; fall back to the id
        let account_name = if account.account_name.is_empty() {
            account.account_id.clone()
        } else {
            account.account_name.clone()
        };

        let roles = portal
            .list_account_roles(&token.access_token, &account.account_id)
            .await?;
        for role in roles {
            for (i, region) in regions.iter().enumerate() {
                let account_name_for_profile = if args.raw_account_names {
                    account_name.clone()
                } else {
                    safe_account_name(&account_name)
                };
                let profile_name = formatter.format(
                    i,
                    &account_name_for_profile,
                    &account.account_id,
                    &role.role_name,
                    region,
                );
                if profile_name == "SKIP" {
                    continue;
                }
                configs.push(ProfileConfig {
                    profile_name,
                    account_name: account_name.clone(),
                    account_id: account.account_id.clone(),
                    role_name: role.role_name.clone(),
                    region: region.clone(),
                });
            }
        }
    }

    configs.sort_by(|a, b| a.profile_name.cmp(&b.profile_name));

    let path = config_file_path()?;
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SsopulseError::Config(format!("Failed to read config file: {}", e)))?;
        AwsConfig::parse(&content)
    } else {
        AwsConfig::default()
    };

    for profile in &configs {
        let values = ProfileValues {
            sso_start_url: Some(session.start_url.clone()),
            sso_region: Some(session.region.clone()),
            sso_account_name: (profile.account_name != profile.account_id)
                .then(|| profile.account_name.clone()),
            sso_account_id: Some(profile.account_id.clone()),
            sso_role_name: Some(profile.role_name.clone()),
            region: Some(profile.region.clone()),
            output: None,
            credential_process,
            auto_populated: true,
        };
        apply_profile(
            &mut config,
            &profile.profile_name,
            &values,
            &defaults,
            args.existing_config_action,
        );
    }

    if args.dry_run {
        tracing::info!(count = configs.len(), "Dry run");
        let mut preview = AwsConfig::default();
        for profile in &configs {
            if let Some(section) = config.profiles.get(&profile.profile_name) {
                preview
                    .profiles
                    .insert(profile.profile_name.clone(), section.clone());
            }
        }
        print!("{}", preview.render());
    } else {
        tracing::info!(count = configs.len(), path = %path.display(), "Writing profiles");
        write_config(&path, &config)?;
        eprintln!("Wrote {} profiles to {}", configs.len(), path.display());
    }

    Ok(())
}
