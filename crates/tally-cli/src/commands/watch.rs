use tokio::sync::broadcast::error::RecvError;
use tally_core::SyncEvent;

use crate::commands::common::AppContext;
use crate::commands::sync::report;
use crate::error::CliError;

/// Run the engine in the foreground: realtime pulls plus debounced pushes
pub async fn run_watch(ctx: &AppContext) -> Result<(), CliError> {
    let engine = ctx.engine()?;
    if !engine.is_enabled() {
        println!("Sync is disabled. Run `tally sync enable` first.");
        return Ok(());
    }

    let mut events = engine.events();
    engine.start()?;
    if let Err(error) = report(engine.sync_now(true).await) {
        eprintln!("{error}");
    }
    println!("Watching for changes, press Ctrl-C to stop");

    let outcome = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                break signal.map_err(CliError::from);
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = describe_event(&event) {
                        println!("{line}");
                    }
                    if matches!(event, SyncEvent::SessionInvalidated) {
                        break Err(CliError::SyncFailed(
                            "Session expired. Please sign in again.".to_string(),
                        ));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {skipped} sync event(s)");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    engine.shutdown();
    outcome
}

pub fn describe_event(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::Completed(result) if result.success => Some(result.message.clone()),
        SyncEvent::Completed(result) => Some(format!("Sync failed: {}", result.message)),
        SyncEvent::ConflictsDetected(conflicts) => Some(format!(
            "{} conflict(s) detected, review them with `tally conflicts list`",
            conflicts.len()
        )),
        SyncEvent::SessionInvalidated => Some("Session invalidated".to_string()),
        SyncEvent::PhaseChanged(phase) => {
            tracing::debug!("Sync phase: {phase}");
            None
        }
        SyncEvent::StatusChanged(_) => None,
    }
}
