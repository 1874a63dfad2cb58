//! Pending-authorization callbacks
//!
//! When the device flow needs user consent, the engine invokes a callback
//! with the user code and verification URIs. The interactive handler prints
//! instructions and opens a browser; the non-interactive one fails fast so
//! unattended callers (the credential process) never hang in the poll loop.

use chrono::{DateTime, Utc};

use crate::errors::{Result, SsopulseError};

/// Environment variable that suppresses browser opening when truthy
pub const DISABLE_BROWSER_VAR: &str = "AWS_SSO_DISABLE_BROWSER";

const BROWSER_MESSAGE: &str = "\
AWS SSO login required.
Attempting to open the SSO authorization page in your default browser.
If the browser does not open or you wish to use a different device to
authorize this request, open the following URL:

{url}

Then enter the code:

{code}
";

const NO_BROWSER_MESSAGE: &str = "\
AWS SSO login required.
Open the following URL in a browser:

{url}

Then enter the code:

{code}
";

/// The details handed to a pending-authorization callback
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_at: DateTime<Utc>,
}

/// Callback invoked when the device flow is waiting on the user
pub trait OnPendingAuthorization: Send + Sync {
    fn on_pending(&self, authorization: &PendingAuthorization) -> Result<()>;
}

/// Prints login instructions and opens the verification URI in a browser.
pub struct OpenBrowserHandler {
    disable_browser: bool,
    message: Option<String>,
}

impl OpenBrowserHandler {
    pub fn new(disable_browser: Option<bool>, message: Option<String>) -> Self {
        let disable_browser = disable_browser.unwrap_or_else(|| {
            std::env::var(DISABLE_BROWSER_VAR)
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true"))
                .unwrap_or(false)
        });
        Self {
            disable_browser,
            message,
        }
    }

    fn render_message(&self, authorization: &PendingAuthorization) -> String {
        let template = match &self.message {
            Some(message) => message.as_str(),
            None if self.disable_browser => NO_BROWSER_MESSAGE,
            None => BROWSER_MESSAGE,
        };
        template
            .replace("{url}", &authorization.verification_uri)
            .replace("{code}", &authorization.user_code)
    }
}

impl OnPendingAuthorization for OpenBrowserHandler {
    fn on_pending(&self, authorization: &PendingAuthorization) -> Result<()> {
        eprintln!("{}", self.render_message(authorization));

        if !self.disable_browser {
            webbrowser::open(&authorization.verification_uri_complete).map_err(|e| {
                SsopulseError::AuthDispatch(format!("Failed to open browser: {}", e))
            })?;
        }
        Ok(())
    }
}

/// Fails immediately; used where interactive auth is not allowed.
pub struct NonInteractiveAuth;

impl OnPendingAuthorization for NonInteractiveAuth {
    fn on_pending(&self, _authorization: &PendingAuthorization) -> Result<()> {
        Err(SsopulseError::AuthenticationNeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorization() -> PendingAuthorization {
        PendingAuthorization {
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://device.sso.us-east-1.amazonaws.com/".to_string(),
            verification_uri_complete:
                "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-EFGH".to_string(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_message_substitution() {
        let handler = OpenBrowserHandler::new(Some(true), None);
        let message = handler.render_message(&authorization());
        assert!(message.contains("ABCD-EFGH"));
        assert!(message.contains("https://device.sso.us-east-1.amazonaws.com/"));
    }

    #[test]
    fn test_custom_message_template() {
        let handler =
            OpenBrowserHandler::new(Some(true), Some("visit {url} code {code}".to_string()));
        let message = handler.render_message(&authorization());
        assert_eq!(
            message,
            "visit https://device.sso.us-east-1.amazonaws.com/ code ABCD-EFGH"
        );
    }

    #[test]
    fn test_non_interactive_raises() {
        let err = NonInteractiveAuth.on_pending(&authorization()).unwrap_err();
        assert!(matches!(err, SsopulseError::AuthenticationNeeded));
    }
}
