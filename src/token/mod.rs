//! Token engine
//!
//! Obtains access tokens for Identity Center sessions via the OAuth 2.0
//! device-authorization flow, caching tokens and client registrations on
//! disk.

pub mod browser;
pub mod cache;
pub mod engine;

pub use browser::{NonInteractiveAuth, OnPendingAuthorization, OpenBrowserHandler, PendingAuthorization};
pub use cache::{CachedRegistration, CachedToken, FileCache};
pub use engine::TokenEngine;
