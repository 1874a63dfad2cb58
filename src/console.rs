//! Console federation
//!
//! Builds the signin federation URLs that turn role credentials into a
//! console session, and packages launch configuration as compact,
//! credential-free config tokens.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use url::Url;

use crate::credentials::CachedCredentials;
use crate::errors::{Result, SsopulseError};

/// Compact config-token keys, one row per launch parameter.
const TOKEN_KEY_MAPPING: &[(&str, &str)] = &[
    ("version", "v"),
    ("sso_start_url", "ssourl"),
    ("sso_region", "ssoreg"),
    ("account_id", "acc"),
    ("role_name", "rol"),
    ("region", "reg"),
    ("federation_endpoint", "url"),
    ("issuer", "iss"),
    ("destination", "dst"),
    ("duration", "dur"),
];

pub const CONFIG_TOKEN_VERSION: &str = "1";

/// The sign-out page for a region's signin endpoint.
pub fn get_logout_url(region: Option<&str>) -> String {
    let redirect = urlencoding::encode(
        "https://aws.amazon.com/premiumsupport/knowledge-center/sign-out-account/",
    )
    .into_owned();
    match region {
        None | Some("us-east-1") => format!(
            "https://signin.aws.amazon.com/oauth?Action=logout&redirect_uri={}",
            redirect
        ),
        Some("us-gov-east-1") => {
            "https://us-gov-east-1.signin.amazonaws-us-gov.com/oauth?Action=logout".to_string()
        }
        Some("us-gov-west-1") => {
            "https://signin.amazonaws-us-gov.com/oauth?Action=logout".to_string()
        }
        Some(region) => format!(
            "https://{}.signin.aws.amazon.com/oauth?Action=logout&redirect_uri={}",
            region, redirect
        ),
    }
}

/// The federation endpoint for a region's signin service.
pub fn get_federation_endpoint(region: Option<&str>) -> String {
    match region {
        None | Some("us-east-1") => "https://signin.aws.amazon.com/federation".to_string(),
        Some("us-gov-east-1") => {
            "https://us-gov-east-1.signin.amazonaws-us-gov.com/federation".to_string()
        }
        Some("us-gov-west-1") => "https://signin.amazonaws-us-gov.com/federation".to_string(),
        Some(region) => format!("https://{}.signin.aws.amazon.com/federation", region),
    }
}

fn get_destination_base_url(region: Option<&str>) -> String {
    match region {
        Some(region) if region.starts_with("us-gov-") => {
            "https://console.amazonaws-us-gov.com".to_string()
        }
        Some(region) => format!("https://{}.console.aws.amazon.com/", region),
        None => "https://console.aws.amazon.com/".to_string(),
    }
}

/// Build the destination console URL from an optional path and region.
///
/// Any scheme/authority in the caller's path is discarded. With
/// `override_region_in_destination`, every existing `region=` query
/// parameter is stripped and one with the resolved region appended;
/// otherwise a `region=` parameter is appended only if none is present.
pub fn get_destination(
    path: Option<&str>,
    region: Option<&str>,
    override_region_in_destination: bool,
) -> Result<String> {
    let base = Url::parse(&get_destination_base_url(region))?;

    let url = match path {
        None => base,
        Some(path) => {
            let relative = match Url::parse(path) {
                // Keep only path, query, and fragment from an absolute URL
                Ok(parsed) => {
                    let mut relative = parsed.path().to_string();
                    if let Some(query) = parsed.query() {
                        relative.push('?');
                        relative.push_str(query);
                    }
                    if let Some(fragment) = parsed.fragment() {
                        relative.push('#');
                        relative.push_str(fragment);
                    }
                    relative
                }
                Err(_) => path.to_string(),
            };
            base.join(&relative)?
        }
    };

    let Some(region) = region else {
        return Ok(url.to_string());
    };

    let mut url = url;
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let has_region = pairs.iter().any(|(key, _)| key == "region");

    if override_region_in_destination {
        let mut new_pairs: Vec<(String, String)> = pairs
            .into_iter()
            .filter(|(key, _)| key != "region")
            .collect();
        new_pairs.push(("region".to_string(), region.to_string()));
        url.query_pairs_mut().clear().extend_pairs(new_pairs);
    } else if !has_region {
        url.query_pairs_mut()
            .append_pair("region", region);
    }

    Ok(url.to_string())
}

/// Console launch parameters, as carried by a config token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTokenParams {
    pub sso_start_url: String,
    pub sso_region: String,
    pub account_id: Option<String>,
    pub role_name: Option<String>,
    pub region: Option<String>,
    pub federation_endpoint: String,
    pub issuer: Option<String>,
    pub destination: String,
    pub duration: Option<u32>,
}

fn to_token_key(key: &str) -> Result<&'static str> {
    TOKEN_KEY_MAPPING
        .iter()
        .find(|(long, _)| *long == key)
        .map(|(_, short)| *short)
        // unknown keys are not allowed in an outgoing token
        .ok_or_else(|| SsopulseError::Argument(format!("Unknown config token key {}", key)))
}

fn from_token_key(token_key: &str) -> &str {
    TOKEN_KEY_MAPPING
        .iter()
        .find(|(_, short)| *short == token_key)
        .map(|(long, _)| *long)
        // unknown keys are allowed in an incoming token
        .unwrap_or(token_key)
}

/// Encode launch parameters as a base64url config token.
///
/// Config tokens never contain credentials.
pub fn encode_config_token(params: &ConfigTokenParams) -> Result<String> {
    let mut data = Map::new();
    let mut put = |key: &str, value: Value| -> Result<()> {
        data.insert(to_token_key(key)?.to_string(), value);
        Ok(())
    };

    put("version", json!(CONFIG_TOKEN_VERSION))?;
    put("sso_start_url", json!(params.sso_start_url))?;
    put("sso_region", json!(params.sso_region))?;
    put("federation_endpoint", json!(params.federation_endpoint))?;
    put("destination", json!(params.destination))?;
    if let Some(account_id) = &params.account_id {
        put("account_id", json!(account_id))?;
    }
    if let Some(role_name) = &params.role_name {
        put("role_name", json!(role_name))?;
    }
    if let Some(region) = &params.region {
        put("region", json!(region))?;
    }
    if let Some(duration) = params.duration {
        put("duration", json!(duration))?;
    }
    // The issuer is left out unless set; it defaults at launch time
    if let Some(issuer) = &params.issuer {
        put("issuer", json!(issuer))?;
    }

    let serialized = serde_json::to_string(&Value::Object(data))?;
    Ok(URL_SAFE.encode(serialized.as_bytes()))
}

/// Decode a config token back into launch parameters.
pub fn decode_config_token(token: &str) -> Result<ConfigTokenParams> {
    let bytes = URL_SAFE
        .decode(token.trim())
        .map_err(|e| SsopulseError::Argument(format!("The config token is invalid: {}", e)))?;
    let payload: Value = serde_json::from_slice(&bytes)
        .map_err(|e| SsopulseError::Argument(format!("The config token is invalid: {}", e)))?;
    let Some(payload) = payload.as_object() else {
        return Err(SsopulseError::Argument(
            "The config token is invalid: not an object".to_string(),
        ));
    };

    let mut data = Map::new();
    let mut unknown_keys = Vec::new();
    for (key, value) in payload {
        let long_key = from_token_key(key);
        if !TOKEN_KEY_MAPPING.iter().any(|(long, _)| *long == long_key) {
            unknown_keys.push(long_key.to_string());
        }
        data.insert(long_key.to_string(), value.clone());
    }
    if !unknown_keys.is_empty() {
        tracing::warn!(keys = ?unknown_keys, "The config token contains unknown keys");
    }

    let version = data.get("version").and_then(Value::as_str);
    if version != Some(CONFIG_TOKEN_VERSION) {
        tracing::warn!(?version, "Unknown config token version");
    }

    let get = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);

    Ok(ConfigTokenParams {
        sso_start_url: get("sso_start_url").unwrap_or_default(),
        sso_region: get("sso_region").unwrap_or_default(),
        account_id: get("account_id"),
        role_name: get("role_name"),
        region: get("region"),
        federation_endpoint: get("federation_endpoint").unwrap_or_default(),
        issuer: get("issuer"),
        destination: get("destination").unwrap_or_default(),
        duration: data
            .get("duration")
            .and_then(Value::as_u64)
            .map(|d| d as u32),
    })
}

/// Obtain a signin token from the federation endpoint.
pub async fn get_signin_token(
    client: &reqwest::Client,
    federation_endpoint: &str,
    credentials: &CachedCredentials,
    duration_minutes: Option<u32>,
) -> Result<String> {
    let session = json!({
        "sessionId": credentials.access_key_id,
        "sessionKey": credentials.secret_access_key,
        "sessionToken": credentials.session_token,
    });

    let mut form = vec![
        ("Action".to_string(), "getSigninToken".to_string()),
        ("Session".to_string(), serde_json::to_string(&session)?),
    ];
    if let Some(duration) = duration_minutes {
        form.push(("SessionDuration".to_string(), (duration * 60).to_string()));
    }

    let response = client
        .post(federation_endpoint)
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(SsopulseError::Service {
            code: format!("Http{}", status.as_u16()),
            message: "Could not get signin token".to_string(),
        });
    }

    let body: Value = response.json().await?;
    body.get("SigninToken")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SsopulseError::Service {
            code: "MalformedResponse".to_string(),
            message: "Signin token missing from federation response".to_string(),
        })
}

/// Build the final console login URL.
pub fn build_login_url(
    federation_endpoint: &str,
    issuer: &str,
    destination: &str,
    signin_token: &str,
) -> Result<String> {
    let mut url = Url::parse(federation_endpoint)?;
    url.query_pairs_mut()
        .append_pair("Action", "login")
        .append_pair("Issuer", issuer)
        .append_pair("Destination", destination)
        .append_pair("SigninToken", signin_token);
    Ok(url.to_string())
}
