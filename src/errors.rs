//! Error types for ssopulse

use thiserror::Error;

use crate::status::ExitStatus;

/// Main error type for ssopulse
#[derive(Error, Debug)]
pub enum SsopulseError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// No valid cached token and interactive authentication is disabled.
    #[error("Authentication needed, please log in")]
    AuthenticationNeeded,

    /// The device-authorization window elapsed before the user approved.
    #[error("The pending authorization has expired")]
    PendingAuthorizationExpired,

    /// The service rejected the cached token during credential exchange.
    #[error("The SSO token is unauthorized: {0}")]
    UnauthorizedSsoToken(String),

    #[error("Invalid SSO configuration: {0}")]
    InvalidSsoConfig(String),

    #[error("Config profile error: {0}")]
    ConfigProfile(String),

    #[error("Config session error: {0}")]
    ConfigSession(String),

    #[error("Inline session error: {0}")]
    InlineSession(String),

    #[error("Mismatched session: {0}")]
    MismatchedSession(String),

    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Browser-open or another auth side channel failed.
    #[error("Auth dispatch error: {0}")]
    AuthDispatch(String),

    /// Malformed input identifier (account id, permission-set id, OU id).
    #[error("Format error: {0}")]
    Format(String),

    /// Declarative assignment config failed validation.
    #[error("Config error: {0}")]
    Config(String),

    /// Template planning failed (resource caps, cycles, allocation).
    #[error("Template error: {0}")]
    Template(String),

    /// An AWS service error with its code, propagated with context.
    #[error("Service error {code}: {message}")]
    Service { code: String, message: String },

    #[error("Invalid argument: {0}")]
    Argument(String),
}

impl SsopulseError {
    /// Map an error to its process exit status.
    ///
    /// 1 = auth needed or configuration not found, 2 = invalid config,
    /// 3 = auth-dispatch failure, 4 = downstream service error, 5 = other.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            SsopulseError::AuthenticationNeeded
            | SsopulseError::UnauthorizedSsoToken(_)
            | SsopulseError::ConfigProfile(_)
            | SsopulseError::ConfigSession(_)
            | SsopulseError::InlineSession(_)
            | SsopulseError::MismatchedSession(_) => ExitStatus::AuthOrConfigNotFound,
            SsopulseError::InvalidSsoConfig(_)
            | SsopulseError::Config(_)
            | SsopulseError::Template(_)
            | SsopulseError::Format(_) => ExitStatus::InvalidConfig,
            SsopulseError::AuthDispatch(_) => ExitStatus::AuthDispatchFailed,
            SsopulseError::Service { .. }
            | SsopulseError::Request(_)
            | SsopulseError::PendingAuthorizationExpired => ExitStatus::ServiceError,
            _ => ExitStatus::OtherError,
        }
    }

    /// True if this is a service error with the given code.
    pub fn is_service_error(&self, error_code: &str) -> bool {
        matches!(self, SsopulseError::Service { code, .. } if code == error_code)
    }
}

pub type Result<T> = std::result::Result<T, SsopulseError>;
