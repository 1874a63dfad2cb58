//! The console commands
//!
//! `launch` signs in to the console as an account and role; `get-config-token`
//! packages launch parameters for later use; `launch-from-config` launches
//! from such a token.

use crate::cli::args::{ConsoleLaunchArgs, GetConfigTokenArgs, LaunchFromConfigArgs};
use crate::config_file::AwsConfig;
use crate::console::{
    build_login_url, decode_config_token, encode_config_token, get_destination,
    get_federation_endpoint, get_logout_url, get_signin_token, ConfigTokenParams,
};
use crate::discovery::{resolve_sessions, SessionSelection};
use crate::errors::{Result, SsopulseError};

pub const LOGOUT_FIRST_VAR: &str = "AWS_CONSOLE_LOGOUT_FIRST";

fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true"))
        .unwrap_or(false)
}

fn resolve_instance(
    sso_start_url: Option<&str>,
    sso_region: Option<&str>,
) -> Result<(String, String)> {
    let selection = SessionSelection {
        specifier: sso_start_url.map(str::to_string),
        sso_region: sso_region.map(str::to_string),
        ..Default::default()
    };
    let sessions = resolve_sessions(&selection, AwsConfig::load)?;
    Ok((sessions[0].start_url.clone(), sessions[0].region.clone()))
}

pub async fn launch(args: &ConsoleLaunchArgs) -> Result<()> {
    let open_url = args.open_url.unwrap_or(!args.print_url);
    let logout_first = args.logout_first || env_truthy(LOGOUT_FIRST_VAR);
    if logout_first && !open_url {
        return Err(SsopulseError::Argument(
            "--logout-first requires --open".to_string(),
        ));
    }

    let (start_url, sso_region) =
        resolve_instance(args.sso_start_url.as_deref(), args.sso_region.as_deref())?;

    let federation_endpoint = get_federation_endpoint(args.region.as_deref());
    let issuer = std::env::var("AWS_CONSOLE_DEFAULT_ISSUER").ok();
    let destination = get_destination(
        args.destination.as_deref(),
        args.region.as_deref(),
        args.override_region_in_destination,
    )?;

    launch_console(&LaunchParams {
        sso_start_url: start_url,
        sso_region,
        account_id: args.account_id.clone(),
        role_name: args.role_name.clone(),
        federation_endpoint,
        issuer,
        destination,
        region: args.region.clone(),
        open_url,
        print_url: args.print_url,
        duration: args.duration,
        logout_first,
        force_refresh: args.force_refresh,
    })
    .await
}

pub async fn get_config_token(args: &GetConfigTokenArgs) -> Result<()> {
    let (start_url, sso_region) =
        resolve_instance(args.sso_start_url.as_deref(), args.sso_region.as_deref())?;

    let federation_endpoint = get_federation_endpoint(args.region.as_deref());
    let destination = get_destination(
        args.destination.as_deref(),
        args.region.as_deref(),
        args.override_region_in_destination,
    )?;

    let params = ConfigTokenParams {
        sso_start_url: start_url,
        sso_region,
        account_id: args.account_id.clone(),
        role_name: args.role_name.clone(),
        region: args.region.clone(),
        federation_endpoint,
        // unless explicitly provided, the issuer is set at launch time
        issuer: args.issuer.clone(),
        destination,
        duration: args.duration,
    };

    println!("{}", encode_config_token(&params)?);
    Ok(())
}

pub async fn launch_from_config(args: &LaunchFromConfigArgs) -> Result<()> {
    let open_url = args.open_url.unwrap_or(!args.print_url);
    let logout_first = args.logout_first || env_truthy(LOGOUT_FIRST_VAR);
    if logout_first && !open_url {
        return Err(SsopulseError::Argument(
            "--logout-first requires --open".to_string(),
        ));
    }

    let mut params = decode_config_token(&args.config_token)?;

    if let Some(account_id) = &args.account_id {
        params.account_id = Some(account_id.clone());
    }
    if params.account_id.is_none() {
        return Err(SsopulseError::Argument(
            "Token does not specify an account, please use --account-id".to_string(),
        ));
    }
    if let Some(role_name) = &args.role_name {
        params.role_name = Some(role_name.clone());
    }
    if params.role_name.is_none() {
        return Err(SsopulseError::Argument(
            "Token does not specify a role, please use --role-name".to_string(),
        ));
    }

    launch_console(&LaunchParams {
        sso_start_url: params.sso_start_url.clone(),
        sso_region: params.sso_region.clone(),
        account_id: params.account_id.clone().unwrap(),
        role_name: params.role_name.clone().unwrap(),
        federation_endpoint: params.federation_endpoint.clone(),
        issuer: params.issuer.clone(),
        destination: params.destination.clone(),
        region: params.region.clone(),
        open_url,
        print_url: args.print_url,
        duration: params.duration,
        logout_first,
        force_refresh: args.force_refresh,
    })
    .await
}

struct LaunchParams {
    sso_start_url: String,
    sso_region: String,
    account_id: String,
    role_name: String,
    federation_endpoint: String,
    issuer: Option<String>,
    destination: String,
    region: Option<String>,
    open_url: bool,
    print_url: bool,
    duration: Option<u32>,
    logout_first: bool,
    force_refresh: bool,
}

async fn launch_console(params: &LaunchParams) -> Result<()> {
    let issuer = params
        .issuer
        .clone()
        .unwrap_or_else(|| params.sso_start_url.clone());

    let token_engine = super::token_engine(&params.sso_region, true, None)?;
    let credential_engine = super::credential_engine(&params.sso_region)?;

    let credentials = credential_engine
        .get_credentials(
            &token_engine,
            &params.sso_start_url,
            None,
            &params.account_id,
            &params.role_name,
            params.force_refresh,
        )
        .await?;

    let client = reqwest::Client::new();
    let signin_token = get_signin_token(
        &client,
        &params.federation_endpoint,
        &credentials,
        params.duration,
    )
    .await?;

    let login_url = build_login_url(
        &params.federation_endpoint,
        &issuer,
        &params.destination,
        &signin_token,
    )?;

    if params.print_url {
        println!("{}", login_url);
    }

    if params.open_url {
        if params.logout_first {
            let logout_url = get_logout_url(params.region.as_deref());
            webbrowser::open(&logout_url).map_err(|e| {
                SsopulseError::AuthDispatch(format!("Failed to open browser: {}", e))
            })?;
        }
        webbrowser::open(&login_url).map_err(|e| {
            SsopulseError::AuthDispatch(format!("Failed to open browser: {}", e))
        })?;
    }

    Ok(())
}
