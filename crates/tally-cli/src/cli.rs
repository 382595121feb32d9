use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tally_core::EntryType;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Track income and expenses offline, sync across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name holding the sync account configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage books
    Book {
        #[command(subcommand)]
        command: BookCommands,
    },
    /// Manage entries
    Entry {
        #[command(subcommand)]
        command: EntryCommands,
    },
    /// Manage categories
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },
    /// Run a sync cycle now, or manage automatic sync
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Inspect and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Keep syncing in the foreground until interrupted
    Watch,
    /// Sign out of the sync account
    Signout {
        /// Also delete every local record of the account
        #[arg(long)]
        wipe: bool,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum EntryKindArg {
    Income,
    #[default]
    Expense,
}

impl From<EntryKindArg> for EntryType {
    fn from(value: EntryKindArg) -> Self {
        match value {
            EntryKindArg::Income => Self::Income,
            EntryKindArg::Expense => Self::Expense,
        }
    }
}

#[derive(Subcommand)]
pub enum BookCommands {
    /// Create a book
    Add {
        /// Book name
        name: String,
        /// ISO-4217 currency code
        #[arg(long, default_value = "USD")]
        currency: String,
    },
    /// Rename a book
    Rename {
        /// Book ID or unique ID prefix
        id: String,
        /// New name
        name: String,
    },
    /// Archive a book, or unarchive it with --undo
    Archive {
        /// Book ID or unique ID prefix
        id: String,
        #[arg(long)]
        undo: bool,
    },
    /// Delete a book
    Delete {
        /// Book ID or unique ID prefix
        id: String,
    },
    /// List books with their balances
    List {
        /// Include archived books
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum EntryCommands {
    /// Record income or an expense
    Add {
        /// Amount, e.g. 12.50
        amount: String,
        /// Book ID or unique ID prefix
        #[arg(long)]
        book: String,
        #[arg(long = "type", value_enum, default_value_t = EntryKindArg::Expense)]
        entry_type: EntryKindArg,
        /// Category ID or unique ID prefix
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        note: Option<String>,
        /// Date (YYYY-MM-DD) or RFC 3339 timestamp; now when omitted
        #[arg(long)]
        date: Option<String>,
    },
    /// Delete an entry
    Delete {
        /// Entry ID or unique ID prefix
        id: String,
    },
    /// List recent entries
    List {
        /// Only entries of this book
        #[arg(long)]
        book: Option<String>,
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum CategoryCommands {
    /// Create a category
    Add {
        /// Category name
        name: String,
        #[arg(long = "type", value_enum, default_value_t = EntryKindArg::Expense)]
        entry_type: EntryKindArg,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    /// Delete a category
    Delete {
        /// Category ID or unique ID prefix
        id: String,
    },
    /// List categories
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Turn automatic sync on and run a cycle
    Enable,
    /// Turn automatic sync off
    Disable,
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List unresolved conflicts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve conflicts; without an entity ID the choice applies to all
    Resolve {
        /// Entity ID or unique ID prefix
        #[arg(requires = "field")]
        entity_id: Option<String>,
        /// Field name, e.g. name or amount
        field: Option<String>,
        #[command(flatten)]
        choice: ResolutionChoice,
    },
    /// Dismiss every conflict without changing records
    Clear,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct ResolutionChoice {
    /// Keep this device's value
    #[arg(long)]
    pub local: bool,
    /// Keep the remote value
    #[arg(long)]
    pub cloud: bool,
    /// Write an explicit JSON value
    #[arg(long, value_name = "JSON")]
    pub value: Option<String>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Document API base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Bearer token for the document API
        #[arg(long, value_name = "TOKEN")]
        access_token: Option<String>,
        /// Token expiry as unix seconds
        #[arg(long, value_name = "SECONDS")]
        token_expires_at: Option<i64>,
        /// Account user ID
        #[arg(long, value_name = "ID")]
        user_id: Option<String>,
        /// Device ID recorded on local edits (generated when unset)
        #[arg(long, value_name = "ID")]
        device_id: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Show the resolved profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
