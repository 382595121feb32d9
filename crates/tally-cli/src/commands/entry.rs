use chrono::Utc;
use tally_core::{Book, Category, Entry, LocalStore, Syncable};

use crate::cli::{EntryCommands, EntryKindArg};
use crate::commands::common::{
    active, entry_to_list_item, format_entry_lines, parse_amount, parse_date, resolve_record,
    AppContext, EntryListItem,
};
use crate::error::CliError;

pub struct NewEntry<'a> {
    pub amount: &'a str,
    pub book: &'a str,
    pub entry_type: EntryKindArg,
    pub category: Option<&'a str>,
    pub note: Option<String>,
    pub date: Option<&'a str>,
}

pub fn run_entry(command: EntryCommands, ctx: &AppContext) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let user_id = ctx.user_id()?;

    match command {
        EntryCommands::Add {
            amount,
            book,
            entry_type,
            category,
            note,
            date,
        } => {
            let request = NewEntry {
                amount: &amount,
                book: &book,
                entry_type,
                category: category.as_deref(),
                note,
                date: date.as_deref(),
            };
            let entry = add_entry(store.as_ref(), user_id, &request, ctx.device_id())?;
            println!("{}", entry.id);
        }
        EntryCommands::Delete { id } => {
            let mut entry = resolve_record(&active::<Entry>(store.as_ref(), user_id)?, &id)?;
            entry.mark_deleted(ctx.device_id());
            store.upsert(user_id, entry.clone())?;
            println!("{}", entry.id);
        }
        EntryCommands::List { book, limit, json } => {
            let mut entries = active::<Entry>(store.as_ref(), user_id)?;
            if let Some(query) = book {
                let book = resolve_record(&active::<Book>(store.as_ref(), user_id)?, &query)?;
                entries.retain(|entry| entry.book_id == book.id);
            }
            entries.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
            entries.truncate(limit);
            let categories = store.get_all::<Category>(user_id)?;

            if json {
                let items = entries
                    .iter()
                    .map(|entry| entry_to_list_item(entry, &categories))
                    .collect::<Vec<EntryListItem>>();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for line in format_entry_lines(&entries, &categories) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

pub fn add_entry(
    store: &impl LocalStore,
    user_id: &str,
    request: &NewEntry<'_>,
    device: &str,
) -> Result<Entry, CliError> {
    let amount = parse_amount(request.amount)?;
    let book = resolve_record(&active::<Book>(store, user_id)?, request.book)?;
    if book.archived {
        return Err(CliError::InvalidInput(format!(
            "Book '{}' is archived",
            book.name
        )));
    }
    let occurred_at = request
        .date
        .map(parse_date)
        .transpose()?
        .unwrap_or_else(Utc::now);

    let mut entry = Entry::new(&book.id, request.entry_type.into(), amount, occurred_at, device);
    if let Some(query) = request.category {
        let category = resolve_record(&active::<Category>(store, user_id)?, query)?;
        entry = entry.with_category(category.id);
    }
    if let Some(note) = tally_core::util::normalize_text_option(request.note.clone()) {
        entry = entry.with_note(note);
    }

    store.upsert(user_id, entry.clone())?;
    Ok(entry)
}
