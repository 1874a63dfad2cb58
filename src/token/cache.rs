//! On-disk caches for tokens, registrations, and role credentials
//!
//! Cache records live as JSON files named by the hex SHA-1 of their key.
//! Timestamps serialize as `YYYY-MM-DDTHH:MM:SSZ` with a literal `Z`, never
//! `+00:00`; some SDKs fail to parse the latter. Writes go to a temp file in
//! the cache directory and are renamed into place.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::errors::{Result, SsopulseError};
use crate::json::canonical_json;

/// A cached access token, in the shared SSO cache format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub start_url: String,
    pub region: String,
    pub access_token: String,
    pub expires_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

/// A cached OIDC client registration; registrations outlive tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRegistration {
    pub client_id: String,
    pub client_secret: String,
    pub expires_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

/// Serialize a timestamp in the cache's wire format.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse a cache timestamp; accepts RFC 3339 offsets as well as `Z`.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SsopulseError::Format(format!("Invalid timestamp {}: {}", value, e)))
}

fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Token cache key: the session name for named sessions, else the start URL.
pub fn token_cache_key(start_url: &str, session_name: Option<&str>) -> String {
    match session_name {
        Some(name) => sha1_hex(name),
        None => sha1_hex(start_url),
    }
}

/// Registration cache key over the registration's full identity.
pub fn registration_cache_key(
    tool: &str,
    start_url: &str,
    region: &str,
    scopes: Option<&[String]>,
    session_name: Option<&str>,
) -> String {
    let mut args = serde_json::json!({
        "tool": tool,
        "startUrl": start_url,
        "region": region,
    });
    if let Some(scopes) = scopes {
        args["scopes"] = serde_json::json!(scopes);
    }
    if let Some(session_name) = session_name {
        args["session_name"] = serde_json::json!(session_name);
    }
    sha1_hex(&canonical_json(&args))
}

/// Role-credential cache key over the request fingerprint.
pub fn credential_cache_key(start_url: &str, role_name: &str, account_id: &str) -> String {
    let args = serde_json::json!({
        "startUrl": start_url,
        "roleName": role_name,
        "accountId": account_id,
    });
    sha1_hex(&canonical_json(&args))
}

/// A directory of JSON cache files keyed by hex digest.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The shared SSO token cache directory (`~/.aws/sso/cache`).
    pub fn sso_token_cache() -> Result<Self> {
        let dir = dirs::home_dir()
            .map(|h| h.join(".aws").join("sso").join("cache"))
            .ok_or_else(|| {
                SsopulseError::Config("Could not determine home directory".to_string())
            })?;
        Ok(Self::new(dir))
    }

    /// The shared CLI credentials cache directory (`~/.aws/cli/cache`).
    pub fn credentials_cache() -> Result<Self> {
        let dir = dirs::home_dir()
            .map(|h| h.join(".aws").join("cli").join("cache"))
            .ok_or_else(|| {
                SsopulseError::Config("Could not determine home directory".to_string())
            })?;
        Ok(Self::new(dir))
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Read and deserialize a record; a missing file is `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Ignoring unreadable cache entry");
                Ok(None)
            }
        }
    }

    /// Serialize and write a record atomically (write-to-temp-then-rename).
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string(value)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.persist(self.path_for(key))
            .map_err(|e| SsopulseError::Io(e.error))?;
        Ok(())
    }

    /// Remove a record, returning it if present.
    pub fn pop<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value = self.get(key)?;
        if value.is_some() {
            std::fs::remove_file(self.path_for(key))?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_token_cache_key_named_vs_inline() {
        let named = token_cache_key("https://x.awsapps.com/start", Some("corp"));
        let inline = token_cache_key("https://x.awsapps.com/start", None);
        assert_ne!(named, inline);
        // Named keys depend only on the session name
        assert_eq!(named, token_cache_key("https://other.awsapps.com/start", Some("corp")));
        // Inline keys depend only on the start URL
        assert_eq!(inline, sha1_hex("https://x.awsapps.com/start"));
    }

    #[test]
    fn test_registration_cache_key_is_scope_sensitive() {
        let scopes = vec!["sso:account:access".to_string()];
        let with = registration_cache_key("ssopulse", "https://u", "us-east-1", Some(&scopes), Some("s"));
        let without = registration_cache_key("ssopulse", "https://u", "us-east-1", None, Some("s"));
        assert_ne!(with, without);
    }

    #[test]
    fn test_timestamp_format_uses_z_suffix() {
        let dt = parse_timestamp("2024-06-01T10:30:00Z").unwrap();
        assert_eq!(format_timestamp(dt), "2024-06-01T10:30:00Z");
        // Offset form parses but always re-serializes with Z
        let dt = parse_timestamp("2024-06-01T10:30:00+00:00").unwrap();
        assert_eq!(format_timestamp(dt), "2024-06-01T10:30:00Z");
    }

    #[test]
    fn test_put_get_pop_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path().to_path_buf());

        let token = CachedToken {
            start_url: "https://x.awsapps.com/start".to_string(),
            region: "us-east-1".to_string(),
            access_token: "tok".to_string(),
            expires_at: "2099-01-01T00:00:00Z".to_string(),
            received_at: None,
            client_id: None,
            client_secret: None,
            registration_expires_at: None,
            refresh_token: None,
            scopes: None,
        };

        let key = token_cache_key(&token.start_url, None);
        cache.put(&key, &token).unwrap();

        let loaded: CachedToken = cache.get(&key).unwrap().unwrap();
        assert_eq!(loaded.access_token, "tok");

        let popped: Option<CachedToken> = cache.pop(&key).unwrap();
        assert!(popped.is_some());
        let gone: Option<CachedToken> = cache.get(&key).unwrap();
        assert!(gone.is_none());
    }

    #[test]
    fn test_serialized_token_omits_absent_fields() {
        let token = CachedToken {
            start_url: "https://x".to_string(),
            region: "us-east-1".to_string(),
            access_token: "tok".to_string(),
            expires_at: "2099-01-01T00:00:00Z".to_string(),
            received_at: None,
            client_id: None,
            client_secret: None,
            registration_expires_at: None,
            refresh_token: None,
            scopes: None,
        };
        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("accessToken"));
        assert!(!json.contains("refreshToken"));
    }
}
