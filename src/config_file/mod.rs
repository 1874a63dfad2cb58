//! AWS configuration file model
//!
//! Parses `~/.aws/config` into ordered profile and sso-session sections.
//! Profile sections are named `[profile name]` (bare `[default]` for the
//! default profile); session sections are named `[sso-session name]`.

pub mod writer;

use std::path::PathBuf;

use indexmap::IndexMap;

use crate::errors::{Result, SsopulseError};

/// One section's key/value pairs, in file order.
pub type Section = IndexMap<String, String>;

/// Parsed AWS config file
#[derive(Debug, Clone, Default)]
pub struct AwsConfig {
    pub profiles: IndexMap<String, Section>,
    pub sso_sessions: IndexMap<String, Section>,
}

/// Get the path to the AWS config file
pub fn config_file_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("AWS_CONFIG_FILE") {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|h| h.join(".aws").join("config"))
        .ok_or_else(|| SsopulseError::Config("Could not determine home directory".to_string()))
}

impl AwsConfig {
    /// Load the AWS config file; a missing file yields an empty config.
    pub fn load() -> Result<Self> {
        let path = config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SsopulseError::Config(format!("Failed to read config file: {}", e)))?;
        Ok(Self::parse(&content))
    }

    /// Parse INI-format config content.
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();
        // (is_session, name) of the section lines are currently accumulating into
        let mut current: Option<(bool, String)> = None;

        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let section = line[1..line.len() - 1].trim();

                current = if section == "default" {
                    Some((false, "default".to_string()))
                } else if let Some(name) = section.strip_prefix("profile ") {
                    Some((false, name.trim().to_string()))
                } else if let Some(name) = section.strip_prefix("sso-session ") {
                    Some((true, name.trim().to_string()))
                } else {
                    None
                };

                if let Some((is_session, name)) = &current {
                    let target = if *is_session {
                        &mut config.sso_sessions
                    } else {
                        &mut config.profiles
                    };
                    target.entry(name.clone()).or_default();
                }
                continue;
            }

            if let Some((is_session, name)) = &current {
                if let Some((key, value)) = parse_key_value(line) {
                    let target = if *is_session {
                        &mut config.sso_sessions
                    } else {
                        &mut config.profiles
                    };
                    if let Some(section) = target.get_mut(name) {
                        section.insert(key, value);
                    }
                }
            }
        }

        config
    }

    /// Render the config back to INI text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, section) in &self.profiles {
            if !out.is_empty() {
                out.push('\n');
            }
            if name == "default" {
                out.push_str("[default]\n");
            } else {
                out.push_str(&format!("[profile {}]\n", name));
            }
            for (key, value) in section {
                out.push_str(&format!("{} = {}\n", key, value));
            }
        }
        for (name, section) in &self.sso_sessions {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[sso-session {}]\n", name));
            for (key, value) in section {
                out.push_str(&format!("{} = {}\n", key, value));
            }
        }
        out
    }
}

fn parse_key_value(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim().to_string()))
}
