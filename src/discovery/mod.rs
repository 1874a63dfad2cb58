//! SSO session discovery
//!
//! Locates Identity Center sessions from CLI arguments, environment
//! variables, and the AWS config file. Sessions are either *named* (defined
//! by an `[sso-session]` block or selected by name) or *inline* (their name
//! is their start URL, which always begins with `http`).
//!
//! Selection precedence, highest first: explicit profile name, explicit
//! session name, a CLI `(start_url, region)` pair (encoded as an inline
//! specifier), a bare CLI specifier, the `AWS_SSO_SESSION` environment
//! variable, then a scan of every session in the config file.

use indexmap::IndexMap;
use serde_json::Value;

use crate::config_file::{AwsConfig, Section};
use crate::errors::{Result, SsopulseError};

/// Environment variable holding a session specifier
pub const SPECIFIER_VAR: &str = "AWS_SSO_SESSION";

/// Fallback start URL / region environment variables
pub const DEFAULT_START_URL_VAR: &str = "AWS_DEFAULT_SSO_START_URL";
pub const DEFAULT_SSO_REGION_VAR: &str = "AWS_DEFAULT_SSO_REGION";

/// Provenance of a configuration value, used only for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub kind: String,
    pub name: String,
    pub parent: Option<Box<Source>>,
}

impl Source {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            parent: None,
        }
    }

    pub fn with_parent(kind: &str, name: &str, parent: Source) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            parent: Some(Box::new(parent)),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.name)?;
        if let Some(parent) = &self.parent {
            write!(f, " \u{2190} {}", parent)?;
        }
        Ok(())
    }
}

/// A discovered Identity Center session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_name: String,
    pub source: Source,
    pub start_url: String,
    pub region: String,
    pub registration_scopes: Option<Vec<String>>,
}

impl Session {
    /// Inline sessions are named by their start URL.
    pub fn is_inline(&self) -> bool {
        self.session_name.starts_with("http")
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_inline() {
            write!(f, "{} ({})", self.start_url, self.region)
        } else {
            write!(f, "{} ({} {})", self.session_name, self.start_url, self.region)
        }
    }
}

/// Parse registration scopes given as a comma- or whitespace-separated list.
pub fn parse_registration_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A user-supplied string selecting a session.
///
/// A value starting with `{` is an inline session descriptor; a value
/// starting with `http` matches start URLs literally; anything else is a
/// regex matched against session names.
#[derive(Debug, Clone)]
pub struct Specifier {
    pub value: String,
    pub source: Source,
    /// Set when the value parsed as an inline session descriptor
    pub session: Option<Session>,
}

impl Specifier {
    pub fn new(value: &str, source: Source) -> Result<Self> {
        let session = Self::parse_inline(value, &source)?;
        Ok(Self {
            value: value.to_string(),
            source,
            session,
        })
    }

    fn parse_inline(value: &str, source: &Source) -> Result<Option<Session>> {
        if !value.trim_start().starts_with('{') {
            return Ok(None);
        }
        let data: Value = serde_json::from_str(value).map_err(|_| {
            SsopulseError::InlineSession("Inline session is not valid JSON".to_string())
        })?;
        let Some(obj) = data.as_object() else {
            return Ok(None);
        };

        let mut missing = Vec::new();
        if !obj.contains_key("sso_start_url") {
            missing.push("sso_start_url");
        }
        if !obj.contains_key("sso_region") {
            missing.push("sso_region");
        }
        if !missing.is_empty() {
            return Err(SsopulseError::InlineSession(format!(
                "Inline session in specifier is missing fields: {}",
                missing.join(" ")
            )));
        }

        let start_url = obj["sso_start_url"].as_str().unwrap_or_default().to_string();
        let region = obj["sso_region"].as_str().unwrap_or_default().to_string();

        let registration_scopes = match obj.get("sso_registration_scopes") {
            Some(Value::String(raw)) => Some(parse_registration_scopes(raw)),
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            Some(_) => {
                return Err(SsopulseError::InlineSession(
                    "Inline session has malformed registration scopes".to_string(),
                ))
            }
            None => None,
        };

        Ok(Some(Session {
            session_name: start_url.clone(),
            source: Source::with_parent("inline specifier", &source.name, source.clone()),
            start_url,
            region,
            registration_scopes,
        }))
    }

    /// Whether this specifier selects the given session.
    pub fn matches(&self, session: &Session) -> bool {
        if self.session.is_some() {
            // An inline specifier is itself the session, it does not filter
            return false;
        }
        if self.value.starts_with("http") {
            return self.value == session.start_url;
        }
        match regex::Regex::new(&self.value) {
            Ok(re) => re.is_match(&session.session_name),
            Err(_) => self.value == session.session_name,
        }
    }
}

/// Read a specifier from `AWS_SSO_SESSION`.
pub fn specifier_from_env() -> Result<Option<Specifier>> {
    match std::env::var(SPECIFIER_VAR) {
        Ok(value) if !value.is_empty() => Ok(Some(Specifier::new(
            &value,
            Source::new("env var", SPECIFIER_VAR),
        )?)),
        _ => Ok(None),
    }
}

/// Read a fallback inline specifier from default start URL / region vars.
///
/// Command-specific vars (e.g. the login command's) take precedence over the
/// generic defaults.
pub fn specifier_from_default_env(
    start_url_vars: &[&str],
    region_vars: &[&str],
) -> Result<Option<Specifier>> {
    let get = |names: &[&str]| -> Option<(String, String)> {
        for name in names {
            if let Ok(value) = std::env::var(name) {
                if !value.is_empty() {
                    return Some((value, name.to_string()));
                }
            }
        }
        None
    };

    let mut url_vars: Vec<&str> = start_url_vars.to_vec();
    url_vars.push(DEFAULT_START_URL_VAR);
    let mut reg_vars: Vec<&str> = region_vars.to_vec();
    reg_vars.push(DEFAULT_SSO_REGION_VAR);

    let Some((start_url, url_var)) = get(&url_vars) else {
        return Ok(None);
    };
    let Some((region, _)) = get(&reg_vars) else {
        return Ok(None);
    };

    let value = serde_json::json!({
        "sso_start_url": start_url,
        "sso_region": region,
    })
    .to_string();
    Ok(Some(Specifier::new(
        &value,
        Source::new("env var", &url_var),
    )?))
}

/// A recorded disagreement between sessions that should be identical.
#[derive(Debug, Clone)]
pub struct MismatchedSession {
    pub session_name: String,
    pub field: String,
    /// `source (value)` descriptions of the disagreeing entries
    pub entries: Vec<String>,
}

impl std::fmt::Display for MismatchedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "session {} has conflicting values for {}: {}",
            self.session_name,
            self.field,
            self.entries.join(", ")
        )
    }
}

/// The result of scanning every session in the config.
#[derive(Debug, Default)]
pub struct FindAllSessions {
    /// Deduplicated by session name, in discovery order
    pub unique_sessions: IndexMap<String, Session>,
    pub all_sessions: Vec<Session>,
    pub malformed_session_errors: Vec<SsopulseError>,
    pub mismatched_sessions: Vec<MismatchedSession>,
}

impl FindAllSessions {
    /// Filter the unique sessions by a specifier.
    pub fn filter(&self, specifier: &Specifier) -> Vec<Session> {
        self.unique_sessions
            .values()
            .filter(|s| specifier.matches(s))
            .cloned()
            .collect()
    }

    /// Fail if any selected session has a recorded mismatch.
    pub fn raise_for_mismatch(&self, selected: &[Session]) -> Result<()> {
        for session in selected {
            for mismatch in &self.mismatched_sessions {
                if mismatch.session_name == session.session_name
                    || mismatch.session_name == session.start_url
                {
                    return Err(SsopulseError::MismatchedSession(mismatch.to_string()));
                }
            }
        }
        Ok(())
    }

    fn add_session(&mut self, session: Session) {
        if !self.unique_sessions.contains_key(&session.session_name) {
            self.unique_sessions
                .insert(session.session_name.clone(), session.clone());
        }
        self.all_sessions.push(session);
    }

    fn detect_mismatches(&mut self) {
        let entry = |session: &Session, value: &str| format!("{} ({})", session.source, value);

        // Same name, different fields
        let mut by_name: IndexMap<&str, Vec<&Session>> = IndexMap::new();
        for session in &self.all_sessions {
            by_name.entry(&session.session_name).or_default().push(session);
        }
        let mut found = Vec::new();
        for (name, group) in &by_name {
            if group.len() < 2 {
                continue;
            }
            let first = group[0];
            for (field, get) in [
                ("start_url", (|s: &Session| s.start_url.clone()) as fn(&Session) -> String),
                ("region", |s: &Session| s.region.clone()),
            ] {
                if group.iter().any(|s| get(s) != get(first)) {
                    found.push(MismatchedSession {
                        session_name: name.to_string(),
                        field: field.to_string(),
                        entries: group.iter().map(|s| entry(s, &get(s))).collect(),
                    });
                }
            }
        }

        // Same start URL, different region; a login to the URL is ambiguous
        let mut by_url: IndexMap<&str, Vec<&Session>> = IndexMap::new();
        for session in &self.all_sessions {
            by_url.entry(&session.start_url).or_default().push(session);
        }
        for (url, group) in &by_url {
            if group.len() < 2 {
                continue;
            }
            let first = group[0];
            if group.iter().any(|s| s.region != first.region) {
                for session in group.iter().filter(|s| !s.is_inline()) {
                    found.push(MismatchedSession {
                        session_name: session.session_name.clone(),
                        field: "region".to_string(),
                        entries: group.iter().map(|s| entry(s, &s.region)).collect(),
                    });
                }
                found.push(MismatchedSession {
                    session_name: url.to_string(),
                    field: "region".to_string(),
                    entries: group.iter().map(|s| entry(s, &s.region)).collect(),
                });
            }
        }

        self.mismatched_sessions = found;
    }
}

/// Whether a config profile turned out not to describe an SSO session.
enum ProfileSession {
    Session(Session),
    NotSso,
}

fn session_from_profile_section(
    profile_name: &str,
    section: &Section,
    parent: Option<Source>,
    config: &AwsConfig,
) -> Result<ProfileSession> {
    if let Some(session_name) = section.get("sso_session") {
        tracing::debug!(profile = profile_name, session = %session_name, "Profile uses config session");
        let source = match parent {
            Some(parent) => Source::with_parent("config profile", profile_name, parent),
            None => Source::new("config profile", profile_name),
        };
        let session =
            session_from_config_session(session_name, Some(source), config).map_err(|e| {
                SsopulseError::ConfigProfile(format!(
                    "Config profile {} uses an invalid config session: {}",
                    profile_name, e
                ))
            })?;
        return Ok(ProfileSession::Session(session));
    }

    let start_url = section.get("sso_start_url");
    let region = section.get("sso_region");

    match (start_url, region) {
        (None, None) => Ok(ProfileSession::NotSso),
        (Some(_), None) => Err(SsopulseError::ConfigProfile(format!(
            "Config profile {} is missing fields: sso_region",
            profile_name
        ))),
        (None, Some(_)) => Err(SsopulseError::ConfigProfile(format!(
            "Config profile {} is missing fields: sso_start_url",
            profile_name
        ))),
        (Some(start_url), Some(region)) => {
            let source = match parent {
                Some(parent) => Source::with_parent("config profile", profile_name, parent),
                None => Source::new("config profile", profile_name),
            };
            Ok(ProfileSession::Session(Session {
                session_name: start_url.clone(),
                source,
                start_url: start_url.clone(),
                region: region.clone(),
                registration_scopes: None,
            }))
        }
    }
}

/// Resolve a session from a config profile by name.
pub fn session_from_config_profile(
    profile_name: &str,
    source: Option<Source>,
    config: &AwsConfig,
) -> Result<Session> {
    let section = config.profiles.get(profile_name).ok_or_else(|| {
        SsopulseError::ConfigProfile(format!("Did not find config profile {}", profile_name))
    })?;
    match session_from_profile_section(profile_name, section, source, config)? {
        ProfileSession::Session(session) => Ok(session),
        ProfileSession::NotSso => Err(SsopulseError::ConfigProfile(format!(
            "Config profile {} is not an SSO profile",
            profile_name
        ))),
    }
}

/// Resolve a session from an `[sso-session]` block by name.
pub fn session_from_config_session(
    session_name: &str,
    source: Option<Source>,
    config: &AwsConfig,
) -> Result<Session> {
    let section = config.sso_sessions.get(session_name).ok_or_else(|| {
        SsopulseError::ConfigSession(format!("Did not find config session {}", session_name))
    })?;

    let start_url = section.get("sso_start_url");
    let region = section.get("sso_region");

    let mut missing = Vec::new();
    if start_url.is_none() {
        missing.push("sso_start_url");
    }
    if region.is_none() {
        missing.push("sso_region");
    }
    if !missing.is_empty() {
        return Err(SsopulseError::ConfigSession(format!(
            "Config session {} is missing fields: {}",
            session_name,
            missing.join(" ")
        )));
    }

    let registration_scopes = section
        .get("sso_registration_scopes")
        .map(|raw| parse_registration_scopes(raw));

    let own_source = Source::new("config session", session_name);
    let source = match source {
        Some(parent) => Source::with_parent("config session", session_name, parent),
        None => own_source,
    };

    Ok(Session {
        session_name: session_name.to_string(),
        source,
        start_url: start_url.unwrap().clone(),
        region: region.unwrap().clone(),
        registration_scopes,
    })
}

/// Scan every profile and sso-session entry for sessions.
///
/// Malformed entries are collected rather than aborting the scan; an env-var
/// specifier carrying an inline session contributes that session too.
pub fn find_all_sessions(
    config: &AwsConfig,
    env_specifier: Option<&Specifier>,
) -> FindAllSessions {
    let mut result = FindAllSessions::default();

    if let Some(specifier) = env_specifier {
        if let Some(session) = &specifier.session {
            result.add_session(session.clone());
        }
    }

    for (profile_name, section) in &config.profiles {
        match session_from_profile_section(profile_name, section, None, config) {
            Ok(ProfileSession::Session(session)) => result.add_session(session),
            Ok(ProfileSession::NotSso) => {}
            Err(e) => result.malformed_session_errors.push(e),
        }
    }

    for session_name in config.sso_sessions.keys() {
        match session_from_config_session(session_name, None, config) {
            Ok(session) => result.add_session(session),
            Err(e) => result.malformed_session_errors.push(e),
        }
    }

    result.detect_mismatches();
    result
}

/// Session-selection inputs, in CLI terms.
#[derive(Debug, Clone, Default)]
pub struct SessionSelection {
    pub specifier: Option<String>,
    pub sso_region: Option<String>,
    pub profile_name: Option<String>,
    pub session_name: Option<String>,
    pub login_all: bool,
    /// Command-specific fallback env vars, checked before the generic ones
    pub default_start_url_vars: Vec<&'static str>,
    pub default_region_vars: Vec<&'static str>,
}

/// Resolve the ordered, non-empty list of sessions to operate on.
///
/// `load_config` is only invoked on paths that need the config file; a CLI
/// `(start_url, region)` pair resolves without reading it.
pub fn resolve_sessions<F>(selection: &SessionSelection, load_config: F) -> Result<Vec<Session>>
where
    F: FnOnce() -> Result<AwsConfig>,
{
    if let Some(profile_name) = &selection.profile_name {
        let config = load_config()?;
        let session = session_from_config_profile(
            profile_name,
            Some(Source::new("CLI parameter", "--profile")),
            &config,
        )?;
        return Ok(vec![session]);
    }

    if let Some(session_name) = &selection.session_name {
        let config = load_config()?;
        let session = session_from_config_session(
            session_name,
            Some(Source::new("CLI parameter", "--sso-session")),
            &config,
        )?;
        return Ok(vec![session]);
    }

    let specifier = if selection.login_all {
        None
    } else {
        effective_specifier(selection)?
    };

    // An inline specifier is a complete session; no scan needed
    if let Some(specifier) = &specifier {
        if let Some(session) = &specifier.session {
            return Ok(vec![session.clone()]);
        }
    }

    let config = load_config()?;
    let env_specifier = specifier_from_env().unwrap_or(None);
    let all_sessions = find_all_sessions(&config, env_specifier.as_ref());

    if all_sessions.unique_sessions.is_empty() {
        let mut message = "No valid Identity Center sessions found".to_string();
        if !all_sessions.malformed_session_errors.is_empty() {
            message.push_str(&format!(
                ", but {} invalid sessions were found: {}",
                all_sessions.malformed_session_errors.len(),
                all_sessions
                    .malformed_session_errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            ));
        }
        return Err(SsopulseError::ConfigSession(message));
    }

    let sessions: Vec<Session> = match &specifier {
        None => all_sessions.unique_sessions.values().cloned().collect(),
        Some(specifier) => {
            let matched = all_sessions.filter(specifier);
            if matched.is_empty() {
                return Err(SsopulseError::ConfigSession(format!(
                    "No Identity Center sessions matched specifier {}",
                    specifier.value
                )));
            }
            matched
        }
    };

    if !selection.login_all && sessions.len() > 1 {
        return Err(SsopulseError::ConfigSession(format!(
            "Found {} Identity Center sessions, please specify one or use --all: {}",
            sessions.len(),
            sessions
                .iter()
                .map(|s| s.session_name.clone())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    // A region given alongside a specifier that uniquely matched a session
    // may contradict that session's configured region
    if let (Some(region), 1) = (&selection.sso_region, sessions.len()) {
        if &sessions[0].region != region {
            tracing::warn!(
                specified = %region,
                configured = %sessions[0].region,
                session = %sessions[0].session_name,
                "Specified region does not match the session's configured region"
            );
        }
    }

    all_sessions.raise_for_mismatch(&sessions)?;

    Ok(sessions)
}

/// Build the effective specifier from CLI arguments and environment.
fn effective_specifier(selection: &SessionSelection) -> Result<Option<Specifier>> {
    if let (Some(specifier), Some(region)) = (&selection.specifier, &selection.sso_region) {
        if specifier.starts_with("http") {
            let value = serde_json::json!({
                "sso_start_url": specifier,
                "sso_region": region,
            })
            .to_string();
            return Ok(Some(Specifier::new(
                &value,
                Source::new("CLI parameter", "positional parameters"),
            )?));
        }
    }

    if let Some(specifier) = &selection.specifier {
        return Ok(Some(Specifier::new(
            specifier,
            Source::new("CLI parameter", "positional parameter"),
        )?));
    }

    if let Some(specifier) = specifier_from_env()? {
        return Ok(Some(specifier));
    }

    specifier_from_default_env(
        &selection.default_start_url_vars,
        &selection.default_region_vars,
    )
}
