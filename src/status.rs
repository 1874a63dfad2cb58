//! Exit status codes for the CLI
//!
//! ssopulse uses distinct exit codes so scripts wrapping the
//! credential-process and login commands can react to the failure class:
//! - 0: success
//! - 1: authentication needed or configuration not found
//! - 2: invalid configuration
//! - 3: auth-dispatch failure (e.g. the browser could not be opened)
//! - 4: downstream service error
//! - 5: any other error

use std::process::{ExitCode, Termination};

/// Exit status codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    /// Successful execution
    Success = 0,
    /// Authentication needed or configuration not found
    AuthOrConfigNotFound = 1,
    /// The effective configuration is invalid
    InvalidConfig = 2,
    /// Browser-open or another auth side channel failed
    AuthDispatchFailed = 3,
    /// A downstream service call failed
    ServiceError = 4,
    /// Any other error
    OtherError = 5,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

impl Termination for ExitStatus {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}
