//! Profile writer
//!
//! Writes `[profile <name>]` sections with the standard SSO keys plus a
//! `credential_process` line pointing back at this tool, merging with any
//! existing section per the requested action.

use std::path::Path;

use clap::ValueEnum;
use indexmap::IndexMap;

use super::AwsConfig;
use crate::errors::{Result, SsopulseError};

/// Environment variable naming an alternate credential-process command
pub const CREDENTIAL_PROCESS_NAME_VAR: &str = "AWS_SSO_CREDENTIAL_PROCESS_NAME";

/// Environment variable disabling the credential-process line entirely
pub const DISABLE_CREDENTIAL_PROCESS_VAR: &str = "AWS_CONFIGURE_SSO_DISABLE_CREDENTIAL_PROCESS";

/// How to merge with a pre-existing profile section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExistingConfigAction {
    /// Existing keys win over defaults; explicit values still overwrite
    #[default]
    Keep,
    /// Defaults overwrite existing keys
    Overwrite,
    /// The existing section is dropped entirely
    Discard,
}

/// The SSO profile values the configure commands write
#[derive(Debug, Clone, Default)]
pub struct ProfileValues {
    pub sso_start_url: Option<String>,
    pub sso_region: Option<String>,
    /// Set for populated profiles whose account name is known
    pub sso_account_name: Option<String>,
    pub sso_account_id: Option<String>,
    pub sso_role_name: Option<String>,
    pub region: Option<String>,
    pub output: Option<String>,
    /// Set the `credential_process` helper line; when false, any existing
    /// line is removed
    pub credential_process: bool,
    /// Mark the profile as auto-populated so later runs can tell these
    /// apart from hand-written ones
    pub auto_populated: bool,
}

impl ProfileValues {
    fn explicit_pairs(&self) -> Vec<(&'static str, &String)> {
        [
            ("sso_start_url", self.sso_start_url.as_ref()),
            ("sso_region", self.sso_region.as_ref()),
            ("sso_account_name", self.sso_account_name.as_ref()),
            ("sso_account_id", self.sso_account_id.as_ref()),
            ("sso_role_name", self.sso_role_name.as_ref()),
            ("region", self.region.as_ref()),
            ("output", self.output.as_ref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect()
    }
}

/// Quote a string for a shell command line if it needs it.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// The `credential_process` command line for a profile.
pub fn credential_process_line(profile_name: &str) -> String {
    let process_name = std::env::var(CREDENTIAL_PROCESS_NAME_VAR)
        .unwrap_or_else(|_| "ssopulse".to_string());
    format!(
        "{} credential-process --profile {}",
        process_name,
        shell_quote(profile_name)
    )
}

/// Merge the values into the named profile of a parsed config.
pub fn apply_profile(
    config: &mut AwsConfig,
    profile_name: &str,
    values: &ProfileValues,
    defaults: &IndexMap<String, String>,
    action: ExistingConfigAction,
) {
    let existing = config.profiles.shift_remove(profile_name);

    let mut section = match (action, existing) {
        (ExistingConfigAction::Discard, _) | (_, None) => IndexMap::new(),
        (_, Some(existing)) => existing,
    };

    for (key, value) in values.explicit_pairs() {
        section.insert(key.to_string(), value.clone());
    }

    for (key, value) in defaults {
        match action {
            ExistingConfigAction::Keep => {
                section.entry(key.clone()).or_insert_with(|| value.clone());
            }
            ExistingConfigAction::Overwrite | ExistingConfigAction::Discard => {
                section.insert(key.clone(), value.clone());
            }
        }
    }

    if values.auto_populated {
        section.insert("sso_auto_populated".to_string(), "true".to_string());
    }

    if values.credential_process {
        section.insert(
            "credential_process".to_string(),
            credential_process_line(profile_name),
        );
    } else {
        section.shift_remove("credential_process");
    }

    config.profiles.insert(profile_name.to_string(), section);
}

/// Write a parsed config back to `path`, atomically.
pub fn write_config(path: &Path, config: &AwsConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = config.render();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, rendered.as_bytes())?;
    tmp.persist(path)
        .map_err(|e| SsopulseError::Config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}

/// Write the profile into the config file at `path`, atomically.
pub fn write_profile(
    path: &Path,
    profile_name: &str,
    values: &ProfileValues,
    defaults: &IndexMap<String, String>,
    action: ExistingConfigAction,
) -> Result<()> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SsopulseError::Config(format!("Failed to read config file: {}", e)))?;
        AwsConfig::parse(&content)
    } else {
        AwsConfig::default()
    };

    apply_profile(&mut config, profile_name, values, defaults, action);
    write_config(path, &config)?;

    tracing::info!(profile = profile_name, path = %path.display(), "Wrote profile");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> ProfileValues {
        ProfileValues {
            sso_start_url: Some("https://example.awsapps.com/start".to_string()),
            sso_region: Some("us-east-2".to_string()),
            sso_account_id: Some("123456789012".to_string()),
            sso_role_name: Some("Developer".to_string()),
            region: Some("us-east-1".to_string()),
            credential_process: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip() {
        let mut config = AwsConfig::default();
        apply_profile(&mut config, "dev", &values(), &IndexMap::new(), ExistingConfigAction::Keep);

        let reparsed = AwsConfig::parse(&config.render());
        let section = reparsed.profiles.get("dev").unwrap();
        assert_eq!(
            section.get("sso_start_url").map(String::as_str),
            Some("https://example.awsapps.com/start")
        );
        assert_eq!(section.get("sso_role_name").map(String::as_str), Some("Developer"));
        assert_eq!(
            section.get("credential_process").map(String::as_str),
            Some("ssopulse credential-process --profile dev")
        );
    }

    #[test]
    fn test_keep_preserves_existing_defaults() {
        let mut config = AwsConfig::parse("[profile dev]\noutput = table\n");
        let mut defaults = IndexMap::new();
        defaults.insert("output".to_string(), "json".to_string());
        apply_profile(&mut config, "dev", &values(), &defaults, ExistingConfigAction::Keep);
        assert_eq!(
            config.profiles["dev"].get("output").map(String::as_str),
            Some("table")
        );
    }

    #[test]
    fn test_overwrite_replaces_existing_defaults() {
        let mut config = AwsConfig::parse("[profile dev]\noutput = table\n");
        let mut defaults = IndexMap::new();
        defaults.insert("output".to_string(), "json".to_string());
        apply_profile(&mut config, "dev", &values(), &defaults, ExistingConfigAction::Overwrite);
        assert_eq!(
            config.profiles["dev"].get("output").map(String::as_str),
            Some("json")
        );
    }

    #[test]
    fn test_discard_drops_unrelated_keys() {
        let mut config = AwsConfig::parse("[profile dev]\nleftover = junk\n");
        apply_profile(&mut config, "dev", &values(), &IndexMap::new(), ExistingConfigAction::Discard);
        assert!(config.profiles["dev"].get("leftover").is_none());
    }

    #[test]
    fn test_populated_profile_markers() {
        let mut config = AwsConfig::default();
        let values = ProfileValues {
            sso_account_name: Some("Workloads".to_string()),
            auto_populated: true,
            ..values()
        };
        apply_profile(&mut config, "dev", &values, &IndexMap::new(), ExistingConfigAction::Keep);

        let section = &config.profiles["dev"];
        assert_eq!(section.get("sso_account_name").map(String::as_str), Some("Workloads"));
        assert_eq!(section.get("sso_auto_populated").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_disabled_credential_process_removes_line() {
        let mut config =
            AwsConfig::parse("[profile dev]\ncredential_process = stale-helper --profile dev\n");
        let values = ProfileValues {
            credential_process: false,
            ..values()
        };
        apply_profile(&mut config, "dev", &values, &IndexMap::new(), ExistingConfigAction::Keep);
        assert!(config.profiles["dev"].get("credential_process").is_none());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("dev"), "dev");
        assert_eq!(shell_quote("my profile"), "'my profile'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
