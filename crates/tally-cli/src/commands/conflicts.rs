use serde_json::Value;
use tally_core::{Conflict, ConflictKey, LocalStore, Resolution, Resolutions};

use crate::cli::{ConflictCommands, ResolutionChoice};
use crate::commands::common::{format_conflict_lines, AppContext};
use crate::error::CliError;

pub async fn run_conflicts(command: ConflictCommands, ctx: &AppContext) -> Result<(), CliError> {
    match command {
        ConflictCommands::List { json } => {
            let conflicts = load_conflicts(ctx)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&conflicts)?);
            } else if conflicts.is_empty() {
                println!("No sync conflicts recorded.");
            } else {
                for line in format_conflict_lines(&conflicts) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        ConflictCommands::Resolve {
            entity_id,
            field,
            choice,
        } => {
            let engine = ctx.engine()?;
            let pending = engine.conflicts();
            let resolution = resolution_from_choice(&choice)?;
            let resolutions = select_resolutions(
                &pending,
                entity_id.as_deref(),
                field.as_deref(),
                &resolution,
            )?;

            let applied = engine.resolve_conflicts(&resolutions).await?;
            println!("Resolved {applied} conflict(s)");
            let dismissed = pending.len().saturating_sub(applied);
            if dismissed > 0 {
                println!("Dismissed {dismissed} other conflict(s); the merged values stay");
            }
            Ok(())
        }
        ConflictCommands::Clear => {
            let store = ctx.open_store()?;
            let user_id = ctx.user_id()?;
            let mut state = store.load_sync_state(user_id)?.unwrap_or_default();
            let cleared = state.conflicts.len();
            state.conflicts.clear();
            store.save_sync_state(user_id, &state)?;
            println!("Cleared {cleared} conflict(s)");
            Ok(())
        }
    }
}

fn load_conflicts(ctx: &AppContext) -> Result<Vec<Conflict>, CliError> {
    let store = ctx.open_store()?;
    Ok(store
        .load_sync_state(ctx.user_id()?)?
        .map(|state| state.conflicts)
        .unwrap_or_default())
}

pub fn resolution_from_choice(choice: &ResolutionChoice) -> Result<Resolution, CliError> {
    match (choice.local, choice.cloud, choice.value.as_deref()) {
        (true, false, None) => Ok(Resolution::UseLocal),
        (false, true, None) => Ok(Resolution::UseCloud),
        (false, false, Some(raw)) => Ok(Resolution::Explicit(parse_value(raw))),
        _ => Err(CliError::InvalidInput(
            "Choose exactly one of --local, --cloud or --value".to_string(),
        )),
    }
}

/// JSON when it parses, a plain string otherwise
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Pick the conflicts a resolve command targets. Without an entity id the
/// resolution applies to every pending conflict.
pub fn select_resolutions(
    pending: &[Conflict],
    entity_id: Option<&str>,
    field: Option<&str>,
    resolution: &Resolution,
) -> Result<Resolutions, CliError> {
    let Some(entity_id) = entity_id.map(str::trim) else {
        if matches!(resolution, Resolution::Explicit(_)) {
            return Err(CliError::InvalidInput(
                "--value needs an entity id and a field".to_string(),
            ));
        }
        return Ok(pending
            .iter()
            .map(|conflict| (conflict.key(), resolution.clone()))
            .collect());
    };

    let field = field.map(str::trim).unwrap_or_default();
    let matches = pending
        .iter()
        .filter(|conflict| conflict.entity_id.starts_with(entity_id))
        .filter(|conflict| {
            conflict.field.name() == field || conflict.field.to_string() == field
        })
        .collect::<Vec<_>>();

    match matches.as_slice() {
        [] => Err(CliError::ConflictNotFound(format!("{entity_id} {field}"))),
        [conflict] => Ok(Resolutions::from([(
            ConflictKey::new(conflict.entity_id.clone(), conflict.field),
            resolution.clone(),
        )])),
        _ => Err(CliError::AmbiguousId(format!(
            "ID prefix '{entity_id}' matches {} conflicts on {field}",
            matches.len()
        ))),
    }
}
