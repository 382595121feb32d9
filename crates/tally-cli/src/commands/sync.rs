use tally_core::{LocalStore, SyncPhase, SyncResult, SyncStatus};

use crate::cli::SyncCommands;
use crate::commands::common::{format_timestamp_label, AppContext};
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub async fn run_sync(command: Option<SyncCommands>, ctx: &AppContext) -> Result<(), CliError> {
    match command {
        None => {
            let engine = ctx.engine()?;
            report(engine.sync_now(true).await)
        }
        Some(SyncCommands::Enable) => {
            let engine = ctx.engine()?;
            report(engine.enable_sync().await)
        }
        Some(SyncCommands::Disable) => {
            // Works offline and without an account configured
            let store = ctx.open_store()?;
            let user_id = ctx.user_id()?;
            let mut state = store.load_sync_state(user_id)?.unwrap_or_default();
            state.enabled = false;
            store.save_sync_state(user_id, &state)?;
            println!("Sync disabled");
            Ok(())
        }
        Some(SyncCommands::Status { json }) => run_status(ctx, json),
    }
}

/// Print a cycle outcome; failures become a non-zero exit
pub fn report(result: SyncResult) -> Result<(), CliError> {
    if !result.success {
        return Err(CliError::SyncFailed(result.message));
    }
    println!("{}", result.message);
    if !result.conflicts.is_empty() {
        println!("Review them with `tally conflicts list`.");
    }
    Ok(())
}

pub fn load_status(ctx: &AppContext) -> Result<SyncStatus, CliError> {
    let store = ctx.open_store()?;
    let state = store.load_sync_state(ctx.user_id()?)?.unwrap_or_default();
    Ok(SyncStatus {
        enabled: state.enabled,
        last_sync_time: state.last_sync_time,
        in_progress: false,
        conflict_count: state.conflicts.len(),
        phase: SyncPhase::Idle,
    })
}

fn run_status(ctx: &AppContext, as_json: bool) -> Result<(), CliError> {
    let status = load_status(ctx)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let configured = ctx.profile.api_base_url.is_some() && ctx.profile.access_token.is_some();
    println!("Profile:      {}", ctx.profile.name);
    println!("Account:      {}", if configured { "configured" } else { "not configured" });
    println!("Auto-sync:    {}", if status.enabled { "enabled" } else { "disabled" });
    println!(
        "Last sync:    {}",
        status
            .last_sync_time
            .as_ref()
            .map_or_else(|| "never".to_string(), format_timestamp_label)
    );
    println!("Conflicts:    {}", status.conflict_count);
    Ok(())
}

pub async fn run_signout(wipe: bool, ctx: &AppContext) -> Result<(), CliError> {
    let engine = ctx.engine()?;
    engine.sign_out_and_reset(wipe).await?;

    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile = config.profile_mut_or_default(&ctx.profile.name);
    profile.access_token = None;
    profile.token_expires_at = None;
    config.save().map_err(CliError::Config)?;

    if wipe {
        println!("Signed out; local records removed");
    } else {
        println!("Signed out; local records kept");
    }
    Ok(())
}
