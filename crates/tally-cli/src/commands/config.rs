use serde::Serialize;
use tally_core::models::new_record_id;
use tally_core::util::normalize_text_option;
use tally_core::SyncSettings;

use crate::cli::ConfigCommands;
use crate::commands::common::AppContext;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

/// Values passed to `config init`; `None` keeps the stored value
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub api_base_url: Option<String>,
    pub access_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
}

pub fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
    ctx: &AppContext,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            api_base_url,
            access_token,
            token_expires_at,
            user_id,
            device_id,
            no_activate,
        } => {
            let update = ProfileUpdate {
                api_base_url,
                access_token,
                token_expires_at,
                user_id,
                device_id,
            };
            run_config_init(profile.as_deref().or(global_profile), update, no_activate)
        }
        ConfigCommands::Show { json } => run_config_show(ctx, json),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    update: ProfileUpdate,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    apply_update(config.profile_mut_or_default(&profile_name), update)?;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let profile = config
        .profile(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    let missing = missing_fields(profile);
    if missing.is_empty() {
        println!("Profile '{profile_name}' is ready. Run `tally sync enable` to start syncing.");
    } else {
        println!("Profile '{profile_name}' is missing: {}", missing.join(", "));
    }
    Ok(())
}

/// Merge explicit values into a stored profile and validate the result
pub fn apply_update(profile: &mut CliProfile, update: ProfileUpdate) -> Result<(), CliError> {
    if let Some(url) = normalize_text_option(update.api_base_url) {
        profile.api_base_url = Some(url.trim_end_matches('/').to_string());
    }
    if let Some(token) = normalize_text_option(update.access_token) {
        profile.access_token = Some(token);
        profile.token_expires_at = update.token_expires_at;
    } else if update.token_expires_at.is_some() {
        profile.token_expires_at = update.token_expires_at;
    }
    if let Some(user_id) = normalize_text_option(update.user_id) {
        profile.user_id = Some(user_id);
    }
    if let Some(device_id) = normalize_text_option(update.device_id) {
        profile.device_id = Some(device_id);
    }
    if profile.device_id.is_none() {
        profile.device_id = Some(new_record_id());
    }
    profile.validate().map_err(CliError::Config)
}

pub fn missing_fields(profile: &CliProfile) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if profile.api_base_url.is_none() {
        missing.push("api_base_url");
    }
    if profile.access_token.is_none() {
        missing.push("access_token");
    }
    if profile.user_id.is_none() {
        missing.push("user_id");
    }
    missing
}

#[derive(Debug, Serialize)]
struct ProfileView<'a> {
    profile: &'a str,
    api_base_url: Option<&'a str>,
    access_token: Option<&'static str>,
    token_expires_at: Option<i64>,
    user_id: Option<&'a str>,
    device_id: &'a str,
    sync: &'a SyncSettings,
}

fn run_config_show(ctx: &AppContext, as_json: bool) -> Result<(), CliError> {
    let profile = &ctx.profile;
    let view = ProfileView {
        profile: &profile.name,
        api_base_url: profile.api_base_url.as_deref(),
        access_token: profile.access_token.as_ref().map(|_| "[REDACTED]"),
        token_expires_at: profile.token_expires_at,
        user_id: profile.user_id.as_deref(),
        device_id: &profile.device_id,
        sync: &profile.settings,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Profile:      {}", view.profile);
    println!("API base URL: {}", view.api_base_url.unwrap_or("-"));
    println!("Access token: {}", view.access_token.unwrap_or("-"));
    println!("User ID:      {}", view.user_id.unwrap_or("-"));
    println!("Device ID:    {}", view.device_id);
    println!("Database:     {}", ctx.db_path.display());
    Ok(())
}
