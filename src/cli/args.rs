//! CLI argument definitions using clap

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config_file::writer::ExistingConfigAction;

#[derive(Debug, Parser)]
#[command(name = "ssopulse", version, about = "AWS IAM Identity Center toolkit", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in to an Identity Center session
    Login(LoginArgs),
    /// Log out of an Identity Center session
    Logout(LogoutArgs),
    /// Credential-process helper for SDKs (not run directly)
    CredentialProcess(CredentialProcessArgs),
    /// Write profiles to the AWS config file
    Configure {
        #[command(subcommand)]
        command: ConfigureCommand,
    },
    /// Sign in to the AWS console
    Console {
        #[command(subcommand)]
        command: ConsoleCommand,
    },
    /// List the accounts and roles you can access
    Roles(RolesArgs),
    /// List account assignments
    Assignments(AssignmentsArgs),
    /// Generate assignment templates from config files
    Template(TemplateArgs),
}

#[derive(Debug, Args, Default)]
pub struct RolesArgs {
    /// Start URL, start-URL regex, or inline session descriptor
    #[arg(value_name = "SPECIFIER")]
    pub specifier: Option<String>,

    /// The Identity Center instance's region
    #[arg(value_name = "SSO_REGION")]
    pub sso_region: Option<String>,

    /// Use a config profile to select the session
    #[arg(long = "profile", value_name = "PROFILE_NAME")]
    pub profile: Option<String>,

    /// Use a config session to select the session
    #[arg(long = "sso-session", value_name = "SESSION_NAME")]
    pub sso_session: Option<String>,

    /// Only check the given account; may be given multiple times
    #[arg(short = 'a', long = "account-id")]
    pub account_id: Vec<String>,

    /// Field separator for output
    #[arg(long = "separator", default_value = ",")]
    pub separator: String,
}

#[derive(Debug, Args, Default)]
pub struct LoginArgs {
    /// Start URL, start-URL regex, or inline session descriptor
    #[arg(value_name = "SPECIFIER")]
    pub specifier: Option<String>,

    /// The Identity Center instance's region
    #[arg(value_name = "SSO_REGION")]
    pub sso_region: Option<String>,

    /// Use a config profile to select the session
    #[arg(long = "profile", value_name = "PROFILE_NAME")]
    pub profile: Option<String>,

    /// Use a config session to select the session
    #[arg(long = "sso-session", value_name = "SESSION_NAME")]
    pub sso_session: Option<String>,

    /// Log in to every discovered session
    #[arg(long = "all")]
    pub login_all: bool,

    /// Always re-authenticate
    #[arg(long = "force-refresh")]
    pub force: bool,

    /// Never open a browser window
    #[arg(long = "headless")]
    pub headless: bool,
}

#[derive(Debug, Args, Default)]
pub struct LogoutArgs {
    /// Start URL, start-URL regex, or inline session descriptor
    #[arg(value_name = "SPECIFIER")]
    pub specifier: Option<String>,

    /// The Identity Center instance's region
    #[arg(value_name = "SSO_REGION")]
    pub sso_region: Option<String>,

    /// Use a config profile to select the session
    #[arg(long = "profile", value_name = "PROFILE_NAME")]
    pub profile: Option<String>,

    /// Use a config session to select the session
    #[arg(long = "sso-session", value_name = "SESSION_NAME")]
    pub sso_session: Option<String>,

    /// Log out of every discovered session
    #[arg(long = "all")]
    pub logout_all: bool,
}

#[derive(Debug, Args, Default)]
pub struct CredentialProcessArgs {
    /// Extract settings from the given profile
    #[arg(long = "profile")]
    pub profile: Option<String>,

    #[arg(long = "sso-start-url", alias = "start-url", env = "AWS_SSO_START_URL")]
    pub start_url: Option<String>,

    #[arg(long = "sso-region", alias = "region", env = "AWS_SSO_REGION")]
    pub region: Option<String>,

    #[arg(long = "account-id", env = "AWS_SSO_ACCOUNT_ID")]
    pub account_id: Option<String>,

    #[arg(long = "role-name", env = "AWS_SSO_ROLE_NAME")]
    pub role_name: Option<String>,

    /// Do not reuse a cached token
    #[arg(long = "force-refresh")]
    pub force_refresh: bool,

    /// Write to the debugging log file
    #[arg(long = "debug")]
    pub debug: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigureCommand {
    /// Configure a single profile
    Profile(ConfigureProfileArgs),
    /// Configure profiles for all accounts and roles
    PopulateProfiles(PopulateProfilesArgs),
}

#[derive(Debug, Args, Default)]
pub struct ConfigureProfileArgs {
    #[arg(value_name = "PROFILE_NAME")]
    pub profile: String,

    #[arg(short = 'u', long = "sso-start-url", env = "AWS_CONFIGURE_SSO_DEFAULT_SSO_START_URL")]
    pub sso_start_url: Option<String>,

    #[arg(long = "sso-region", env = "AWS_CONFIGURE_SSO_DEFAULT_SSO_REGION")]
    pub sso_region: Option<String>,

    /// The AWS account for the profile
    #[arg(short = 'a', long = "account-id")]
    pub account: Option<String>,

    /// The SSO role (permission set name) to assume in the account
    #[arg(short = 'r', long = "role-name")]
    pub role: Option<String>,

    /// The AWS region the profile will use
    #[arg(long = "region")]
    pub region: Option<String>,

    /// The CLI output format for the profile
    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,

    /// Additional config field, KEY=VALUE; may be given multiple times
    #[arg(short = 'c', long = "config-default", value_name = "KEY=VALUE")]
    pub config_default: Vec<String>,

    /// Action when config defaults conflict with existing settings
    #[arg(long = "existing-config-action", value_enum, default_value = "keep")]
    pub existing_config_action: ExistingConfigAction,

    /// Force enable/disable the credential-process SDK helper
    #[arg(long = "credential-process", action = ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
    pub credential_process: Option<bool>,
}

#[derive(Debug, Args, Default)]
pub struct PopulateProfilesArgs {
    #[arg(short = 'u', long = "sso-start-url", env = "AWS_CONFIGURE_SSO_DEFAULT_SSO_START_URL")]
    pub sso_start_url: Option<String>,

    #[arg(long = "sso-region", env = "AWS_CONFIGURE_SSO_DEFAULT_SSO_REGION")]
    pub sso_region: Option<String>,

    /// AWS region for the profiles; may be given multiple times
    #[arg(short = 'r', long = "region", value_name = "REGION")]
    pub region: Vec<String>,

    /// Print the profiles to stdout instead of writing the config file
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Additional config field, KEY=VALUE; may be given multiple times
    #[arg(short = 'c', long = "config-default", value_name = "KEY=VALUE")]
    pub config_default: Vec<String>,

    /// Action when config defaults conflict with existing settings
    #[arg(long = "existing-config-action", value_enum, default_value = "keep")]
    pub existing_config_action: ExistingConfigAction,

    /// Profile name components to join (comma-separated)
    #[arg(
        long = "components",
        value_name = "VALUE,VALUE,...",
        default_value = crate::commands::populate_profiles::DEFAULT_COMPONENTS
    )]
    pub components: String,

    /// Separator for profile name components (default ".")
    #[arg(long = "separator", alias = "sep", value_name = "SEP")]
    pub separator: Option<String>,

    /// By default, the first region is left off the profile name
    #[arg(long = "include-region", value_enum, default_value = "default")]
    pub include_region: crate::commands::populate_profiles::IncludeRegion,

    /// Default is five character region abbreviations
    #[arg(long = "region-style", value_enum, default_value = "short")]
    pub region_style: crate::commands::populate_profiles::RegionStyle,

    /// Regex to remove from account names; may be given multiple times
    #[arg(long = "trim-account-name")]
    pub trim_account_name: Vec<String>,

    /// Regex to remove from role names; may be given multiple times
    #[arg(long = "trim-role-name")]
    pub trim_role_name: Vec<String>,

    /// Keep account names as-is instead of dashing whitespace
    #[arg(long = "raw-account-names")]
    pub raw_account_names: bool,

    /// Force enable/disable the credential-process SDK helper
    #[arg(long = "credential-process", action = ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
    pub credential_process: Option<bool>,

    /// Re-login
    #[arg(long = "force-refresh")]
    pub force_refresh: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConsoleCommand {
    /// Sign in to the console as an account and role
    Launch(ConsoleLaunchArgs),
    /// Package launch config as a token for launch-from-config
    GetConfigToken(GetConfigTokenArgs),
    /// Sign in to the console using a config token
    LaunchFromConfig(LaunchFromConfigArgs),
}

#[derive(Debug, Args, Default)]
pub struct ConsoleLaunchArgs {
    #[arg(short = 'u', long = "sso-start-url", value_name = "URL")]
    pub sso_start_url: Option<String>,

    #[arg(long = "sso-region", value_name = "REGION")]
    pub sso_region: Option<String>,

    /// The AWS account
    #[arg(short = 'a', long = "account-id", required = true)]
    pub account_id: String,

    /// The SSO role to assume in the account
    #[arg(short = 'r', long = "role-name", required = true)]
    pub role_name: String,

    /// The AWS region for the console
    #[arg(long = "region", env = "AWS_CONSOLE_DEFAULT_REGION")]
    pub region: Option<String>,

    /// Console URL path to go to
    #[arg(long = "destination", env = "AWS_CONSOLE_DEFAULT_DESTINATION")]
    pub destination: Option<String>,

    #[arg(long = "override-region-in-destination")]
    pub override_region_in_destination: bool,

    /// Open the login URL in a browser (the default)
    #[arg(short = 'o', long = "open", action = ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
    pub open_url: Option<bool>,

    /// Print the login URL
    #[arg(short = 'p', long = "print")]
    pub print_url: bool,

    /// The session duration in minutes (15-720)
    #[arg(long = "duration", value_parser = clap::value_parser!(u32).range(15..=720))]
    pub duration: Option<u32>,

    /// Open a logout page first
    #[arg(short = 'l', long = "logout-first")]
    pub logout_first: bool,

    /// Re-login to Identity Center
    #[arg(long = "force-refresh")]
    pub force_refresh: bool,
}

#[derive(Debug, Args, Default)]
pub struct GetConfigTokenArgs {
    #[arg(short = 'u', long = "sso-start-url", value_name = "URL")]
    pub sso_start_url: Option<String>,

    #[arg(long = "sso-region", value_name = "REGION")]
    pub sso_region: Option<String>,

    #[arg(short = 'a', long = "account-id")]
    pub account_id: Option<String>,

    #[arg(short = 'r', long = "role-name")]
    pub role_name: Option<String>,

    #[arg(long = "region")]
    pub region: Option<String>,

    #[arg(long = "destination")]
    pub destination: Option<String>,

    #[arg(long = "override-region-in-destination")]
    pub override_region_in_destination: bool,

    #[arg(long = "duration", value_parser = clap::value_parser!(u32).range(15..=720))]
    pub duration: Option<u32>,

    #[arg(long = "issuer", hide = true, env = "AWS_CONSOLE_DEFAULT_ISSUER")]
    pub issuer: Option<String>,
}

#[derive(Debug, Args, Default)]
pub struct LaunchFromConfigArgs {
    /// The config token
    #[arg(short = 't', long = "config-token", required = true)]
    pub config_token: String,

    #[arg(short = 'a', long = "account-id")]
    pub account_id: Option<String>,

    #[arg(short = 'r', long = "role-name")]
    pub role_name: Option<String>,

    #[arg(short = 'o', long = "open", action = ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
    pub open_url: Option<bool>,

    #[arg(short = 'p', long = "print")]
    pub print_url: bool,

    #[arg(short = 'l', long = "logout-first")]
    pub logout_first: bool,

    #[arg(long = "force-refresh")]
    pub force_refresh: bool,
}

#[derive(Debug, Args, Default)]
pub struct AssignmentsArgs {
    /// The admin-plane region
    #[arg(long = "region")]
    pub region: Option<String>,

    #[arg(long = "instance-arn")]
    pub instance_arn: Option<String>,

    #[arg(long = "identity-store-id")]
    pub identity_store_id: Option<String>,

    /// Group id to include; may be given multiple times
    #[arg(short = 'g', long = "group")]
    pub group: Vec<String>,

    /// User id to include; may be given multiple times
    #[arg(long = "user")]
    pub user: Vec<String>,

    /// Principal id of either type; may be given multiple times
    #[arg(long = "principal")]
    pub principal: Vec<String>,

    /// Permission set ARN or id; may be given multiple times
    #[arg(short = 'p', long = "permission-set")]
    pub permission_set: Vec<String>,

    /// Account id, root id, or OU id; may be given multiple times
    #[arg(short = 't', long = "target")]
    pub target: Vec<String>,

    /// Fan OU targets out through child OUs
    #[arg(long = "ou-recursive")]
    pub ou_recursive: bool,

    /// Resolve display names for principals, permission sets, and targets
    #[arg(short = 'n', long = "lookup-names")]
    pub lookup_names: bool,

    /// Field separator for output
    #[arg(long = "separator", default_value = ",")]
    pub separator: String,
}

#[derive(Debug, Args, Default)]
pub struct TemplateArgs {
    /// Policy config files (YAML)
    #[arg(value_name = "CONFIG", required = true)]
    pub config: Vec<std::path::PathBuf>,

    /// The admin-plane region
    #[arg(long = "region")]
    pub region: Option<String>,

    #[arg(long = "instance-arn")]
    pub instance_arn: Option<String>,

    #[arg(long = "identity-store-id")]
    pub identity_store_id: Option<String>,

    /// Output directory for generated templates
    #[arg(short = 'o', long = "output-dir", default_value = "templates")]
    pub output_dir: std::path::PathBuf,

    /// Resolve display names into assignment metadata
    #[arg(short = 'n', long = "lookup-names")]
    pub lookup_names: bool,

    /// Hard cap on resources per emitted template
    #[arg(long = "max-resources-per-template")]
    pub max_resources_per_template: Option<i64>,

    /// Sliding window of in-flight assignments per stack
    #[arg(long = "max-concurrent-assignments")]
    pub max_concurrent_assignments: Option<i64>,

    /// Lower bound on child-stack count, sized for future growth
    #[arg(long = "max-assignments-allocation")]
    pub max_assignments_allocation: Option<i64>,

    /// Fixed child-stack count; 0 forces a single template
    #[arg(long = "num-child-stacks")]
    pub num_child_stacks: Option<i64>,

    /// Default SessionDuration for permission sets that lack one
    #[arg(long = "default-session-duration")]
    pub default_session_duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_login() {
        let cli = Cli::parse_from([
            "ssopulse",
            "login",
            "https://x.awsapps.com/start",
            "us-east-1",
            "--headless",
        ]);
        match cli.command {
            Command::Login(args) => {
                assert_eq!(args.specifier.as_deref(), Some("https://x.awsapps.com/start"));
                assert_eq!(args.sso_region.as_deref(), Some("us-east-1"));
                assert!(args.headless);
            }
            _ => panic!("expected login"),
        }
    }

    #[test]
    fn test_parse_credential_process() {
        let cli = Cli::parse_from([
            "ssopulse",
            "credential-process",
            "--profile",
            "dev",
            "--force-refresh",
        ]);
        match cli.command {
            Command::CredentialProcess(args) => {
                assert_eq!(args.profile.as_deref(), Some("dev"));
                assert!(args.force_refresh);
            }
            _ => panic!("expected credential-process"),
        }
    }
}
