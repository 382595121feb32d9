use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tally_core::Error),
    #[error(transparent)]
    Auth(#[from] tally_core::AuthError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    InvalidInput(String),
    #[error("No {kind} found for id/prefix: {query}")]
    RecordNotFound { kind: &'static str, query: String },
    #[error("{0}")]
    AmbiguousId(String),
    #[error("No conflict on {0}")]
    ConflictNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No user configured. Run `tally config init --user-id <id>` or set TALLY_USER_ID.")]
    NoUser,
    #[error(
        "Sync is not configured. Run `tally config init --api-base-url <url> --access-token <token> --user-id <id>`, or set TALLY_API_BASE_URL, TALLY_ACCESS_TOKEN and TALLY_USER_ID."
    )]
    SyncNotConfigured,
    #[error("{0}")]
    SyncFailed(String),
}
