use tally_core::{Book, Entry, LocalStore, Syncable};

use crate::cli::BookCommands;
use crate::commands::common::{
    active, book_to_list_item, format_book_lines, normalize_name, resolve_record, AppContext,
    BookListItem,
};
use crate::error::CliError;

pub fn run_book(command: BookCommands, ctx: &AppContext) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let user_id = ctx.user_id()?;
    let device = ctx.device_id();

    match command {
        BookCommands::Add { name, currency } => {
            let currency = currency.trim();
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(CliError::InvalidInput(format!(
                    "Currency must be a three-letter code, got '{currency}'"
                )));
            }
            let book = Book::new(normalize_name(&name)?, currency, device);
            store.upsert(user_id, book.clone())?;
            println!("{}", book.id);
        }
        BookCommands::Rename { id, name } => {
            let mut book = resolve_record(&active::<Book>(store.as_ref(), user_id)?, &id)?;
            book.rename(normalize_name(&name)?, device);
            store.upsert(user_id, book.clone())?;
            println!("{}", book.id);
        }
        BookCommands::Archive { id, undo } => {
            let mut book = resolve_record(&active::<Book>(store.as_ref(), user_id)?, &id)?;
            book.set_archived(!undo, device);
            store.upsert(user_id, book.clone())?;
            println!("{}", book.id);
        }
        BookCommands::Delete { id } => {
            let book = delete_book(store.as_ref(), user_id, &id, device)?;
            println!("{}", book.id);
        }
        BookCommands::List { all, json } => {
            let entries = active::<Entry>(store.as_ref(), user_id)?;
            let items = active::<Book>(store.as_ref(), user_id)?
                .iter()
                .filter(|book| all || !book.archived)
                .map(|book| book_to_list_item(book, &entries))
                .collect::<Vec<BookListItem>>();

            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("No books yet. Create one with `tally book add <name>`.");
            } else {
                for line in format_book_lines(&items) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

/// Tombstone a book together with its entries
pub fn delete_book(
    store: &impl LocalStore,
    user_id: &str,
    query: &str,
    device: &str,
) -> Result<Book, CliError> {
    let mut book = resolve_record(&active::<Book>(store, user_id)?, query)?;
    let mut entries = store.get_all::<Entry>(user_id)?;
    let mut orphaned = 0;
    for entry in entries
        .iter_mut()
        .filter(|entry| entry.book_id == book.id && !entry.is_deleted())
    {
        entry.mark_deleted(device);
        orphaned += 1;
    }
    if orphaned > 0 {
        store.replace_all(user_id, &entries)?;
        tracing::debug!("Deleted {orphaned} entries of book {}", book.id);
    }

    book.mark_deleted(device);
    store.upsert(user_id, book.clone())?;
    Ok(book)
}
