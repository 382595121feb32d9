use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tally_core::{
    Book, Category, Conflict, Entry, EntryType, HttpRemoteStore, LocalStore, SqliteLocalStore,
    StaticTokenAuth, SyncEngine, Syncable,
};

use crate::config_profiles::{CliProfilesConfig, ResolvedProfile};
use crate::error::CliError;

pub type CliEngine =
    SyncEngine<SqliteLocalStore, HttpRemoteStore<StaticTokenAuth>, StaticTokenAuth>;

const SHORT_ID_LEN: usize = 13;

/// Everything a command needs to reach the local store and the account
pub struct AppContext {
    pub db_path: PathBuf,
    pub profile: ResolvedProfile,
}

impl AppContext {
    pub fn load(db_path: Option<PathBuf>, profile: Option<&str>) -> Result<Self, CliError> {
        let config = CliProfilesConfig::load().map_err(CliError::Config)?;
        Ok(Self {
            db_path: resolve_db_path(db_path),
            profile: config.resolve(profile),
        })
    }

    pub fn user_id(&self) -> Result<&str, CliError> {
        self.profile.user_id.as_deref().ok_or(CliError::NoUser)
    }

    pub fn device_id(&self) -> &str {
        &self.profile.device_id
    }

    pub fn open_store(&self) -> Result<Arc<SqliteLocalStore>, CliError> {
        open_store(&self.db_path)
    }

    /// Wire the engine to the local database and the document API
    pub fn engine(&self) -> Result<CliEngine, CliError> {
        let profile = &self.profile;
        let (Some(base_url), Some(token), Some(user_id)) = (
            profile.api_base_url.as_deref(),
            profile.access_token.as_deref(),
            profile.user_id.as_deref(),
        ) else {
            return Err(CliError::SyncNotConfigured);
        };

        let auth = Arc::new(StaticTokenAuth::new(
            token,
            user_id,
            profile.token_expires_at,
        )?);
        let remote = HttpRemoteStore::new(base_url, Arc::clone(&auth), &profile.settings)?;
        Ok(SyncEngine::new(
            self.open_store()?,
            Arc::new(remote),
            auth,
            profile.settings.clone(),
            profile.device_id.clone(),
        ))
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TALLY_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
        .join("tally.db")
}

pub fn open_store(path: &Path) -> Result<Arc<SqliteLocalStore>, CliError> {
    Ok(Arc::new(SqliteLocalStore::open(path)?))
}

/// Live (non-tombstoned) records of one kind
pub fn active<T: Syncable>(store: &impl LocalStore, user_id: &str) -> Result<Vec<T>, CliError> {
    let mut records = store.get_all::<T>(user_id)?;
    records.retain(|record| !record.is_deleted());
    Ok(records)
}

/// Find a live record by full id or unique id prefix
pub fn resolve_record<T: Syncable>(records: &[T], query: &str) -> Result<T, CliError> {
    let query = normalize_identifier(query)?;
    if let Some(record) = records
        .iter()
        .find(|record| !record.is_deleted() && record.id() == query)
    {
        return Ok(record.clone());
    }

    let matches = records
        .iter()
        .filter(|record| !record.is_deleted() && record.id().starts_with(&query))
        .collect::<Vec<_>>();
    match matches.as_slice() {
        [] => Err(CliError::RecordNotFound {
            kind: T::KIND.as_str(),
            query,
        }),
        [record] => Ok((*record).clone()),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|record| short_id(record.id()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::InvalidInput("ID cannot be empty".to_string()))
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_name(name: &str) -> Result<String, CliError> {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        Err(CliError::InvalidInput("Name cannot be empty".to_string()))
    } else {
        Ok(collapsed)
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

/// Parse a decimal amount into minor units: `12`, `12.5` and `12.50` are
/// all accepted
pub fn parse_amount(raw: &str) -> Result<i64, CliError> {
    let invalid = || CliError::InvalidInput(format!("Invalid amount '{raw}'"));
    let trimmed = raw.trim();
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty()
        || fraction.len() > 2
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole = whole.parse::<i64>().map_err(|_| invalid())?;
    let cents = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => fraction.parse::<i64>().map_err(|_| invalid())?,
    };
    whole
        .checked_mul(100)
        .and_then(|value| value.checked_add(cents))
        .ok_or_else(invalid)
}

pub fn format_amount(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, CliError> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|_| CliError::InvalidInput(format!("Invalid date '{raw}'")))
}

pub fn format_timestamp_label(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(timestamp: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(*timestamp).num_milliseconds();
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub const fn entry_type_label(entry_type: EntryType) -> &'static str {
    match entry_type {
        EntryType::Income => "income",
        EntryType::Expense => "expense",
    }
}

#[derive(Debug, Serialize)]
pub struct BookListItem {
    pub id: String,
    pub name: String,
    pub currency: String,
    pub archived: bool,
    /// Minor units
    pub balance: i64,
    pub entries: usize,
}

pub fn book_to_list_item(book: &Book, entries: &[Entry]) -> BookListItem {
    let own = entries
        .iter()
        .filter(|entry| entry.book_id == book.id)
        .collect::<Vec<_>>();
    BookListItem {
        id: book.id.clone(),
        name: book.name.clone(),
        currency: book.currency.clone(),
        archived: book.archived,
        balance: own.iter().map(|entry| entry.signed_amount()).sum(),
        entries: own.len(),
    }
}

pub fn format_book_lines(items: &[BookListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let balance = format!("{} {}", format_amount(item.balance), item.currency);
            let archived = if item.archived { "  (archived)" } else { "" };
            format!(
                "{:<13}  {:<30}  {balance:>16}  {} entries{archived}",
                short_id(&item.id),
                item.name,
                item.entries
            )
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct EntryListItem {
    pub id: String,
    pub book_id: String,
    pub category: Option<String>,
    pub entry_type: &'static str,
    pub amount: i64,
    pub note: Option<String>,
    pub occurred_at: String,
}

pub fn entry_to_list_item(entry: &Entry, categories: &[Category]) -> EntryListItem {
    let category = entry.category_id.as_ref().map(|id| {
        categories
            .iter()
            .find(|category| &category.id == id)
            .map_or_else(|| short_id(id), |category| category.name.clone())
    });
    EntryListItem {
        id: entry.id.clone(),
        book_id: entry.book_id.clone(),
        category,
        entry_type: entry_type_label(entry.entry_type),
        amount: entry.amount,
        note: entry.note.clone(),
        occurred_at: tally_core::wire::format_timestamp(&entry.occurred_at),
    }
}

pub fn format_entry_lines(entries: &[Entry], categories: &[Category]) -> Vec<String> {
    let now = Utc::now();
    entries
        .iter()
        .map(|entry| {
            let item = entry_to_list_item(entry, categories);
            let amount = format_amount(entry.signed_amount());
            let category = item.category.unwrap_or_default();
            let note = item.note.unwrap_or_default();
            let when = format_relative_time(&entry.occurred_at, &now);
            format!(
                "{:<13}  {amount:>12}  {category:<16}  {when:<10}  {note}",
                short_id(&entry.id)
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

pub fn format_category_lines(categories: &[Category]) -> Vec<String> {
    categories
        .iter()
        .map(|category| {
            let icon = category.icon.as_deref().unwrap_or("");
            format!(
                "{:<13}  {:<7}  {icon:<2} {}",
                short_id(&category.id),
                entry_type_label(category.entry_type),
                category.name
            )
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{:<8}  {:<13}  {:<12}  local={}  cloud={}",
                conflict.entity_type.as_str(),
                short_id(&conflict.entity_id),
                conflict.field.name(),
                conflict.local_value,
                conflict.cloud_value
            )
        })
        .collect()
}
