//! ssopulse library interface
//!
//! An AWS IAM Identity Center (SSO) toolkit: session discovery, the
//! device-authorization token engine, role-credential caching, assignment
//! expansion, and CloudFormation template planning.
//!
//! # Module Organization
//!
//! - [`discovery`] - locate SSO sessions from args, env vars, and config
//! - [`token`] - device-flow token engine with on-disk caching
//! - [`credentials`] - role-credential engine
//! - [`lookup`] - instance discovery and id/name lookups
//! - [`assignments`] - assignment expansion
//! - [`cfn`] - config loading, resource model, template planning, transform
//! - [`console`] - federation URLs and config tokens
//! - [`aws`] - service clients
//! - [`errors`] / [`status`] - error taxonomy and exit codes

pub mod assignments;
pub mod aws;
pub mod cfn;
pub mod cli;
pub mod commands;
pub mod config_file;
pub mod console;
pub mod credentials;
pub mod discovery;
pub mod errors;
pub mod format;
pub mod json;
pub mod lookup;
pub mod status;
pub mod token;
