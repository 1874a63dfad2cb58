//! Identifier formatting and validation
//!
//! Account ids, permission-set ARNs, and organizational-unit ids come in
//! several shorthand forms; this module normalizes them to the canonical
//! forms the service APIs expect.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{Result, SsopulseError};

/// Matches an organization root id (`r-xxxx`).
pub static ROOT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^r-[a-z0-9]{4,32}$").expect("root id regex"));

/// Matches an organizational unit id (`ou-xxxx-yyyyyyyy`).
pub static OU_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ou-[a-z0-9]{4,32}-[a-z0-9]{8,32}$").expect("OU id regex"));

static ALL_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("digits regex"));

/// Left-pad an account id to the canonical 12 digits.
///
/// Account ids given as numbers (e.g. in YAML) lose their leading zeros.
pub fn format_account_id(account_id: &str) -> String {
    if account_id.len() < 12 && ALL_DIGITS_RE.is_match(account_id) {
        format!("{:0>12}", account_id)
    } else {
        account_id.to_string()
    }
}

/// True if the value is a root or OU id.
pub fn is_ou_id(value: &str) -> bool {
    ROOT_ID_RE.is_match(value) || OU_ID_RE.is_match(value)
}

/// True if the value looks like an account id (all digits).
pub fn is_account_id(value: &str) -> bool {
    ALL_DIGITS_RE.is_match(value)
}

/// Extract the instance id (`ssoins-...`) from an instance ARN.
pub fn instance_id_from_arn(instance_arn: &str) -> &str {
    match instance_arn.split_once('/') {
        Some((_, id)) => id,
        None => instance_arn,
    }
}

/// Normalize an instance id to a full instance ARN.
pub fn format_instance_arn(instance: &str) -> String {
    if instance.starts_with("arn:") {
        instance.to_string()
    } else {
        format!("arn:aws:sso:::instance/{}", instance)
    }
}

/// Normalize a permission-set identifier to a full ARN.
///
/// Accepts a full ARN, an instance-scoped form (`ssoins-.../ps-...` or the
/// bare `ssoins-...`/`ins-...` prefix), or a bare `ps-` id which needs the
/// active instance id.
pub fn format_permission_set_arn(instance_id: &str, permission_set: &str) -> Result<String> {
    if permission_set.starts_with("arn") {
        Ok(permission_set.to_string())
    } else if permission_set.starts_with("ssoins-") || permission_set.starts_with("ins-") {
        Ok(format!("arn:aws:sso:::permissionSet/{}", permission_set))
    } else if permission_set.starts_with("ps-") {
        Ok(format!(
            "arn:aws:sso:::permissionSet/{}/{}",
            instance_id, permission_set
        ))
    } else {
        Err(SsopulseError::Format(format!(
            "Unrecognized permission set id format: {}",
            permission_set
        )))
    }
}
