use tally_core::util::normalize_text_option;
use tally_core::{Category, LocalStore, Syncable};

use crate::cli::CategoryCommands;
use crate::commands::common::{
    active, format_category_lines, normalize_name, resolve_record, AppContext,
};
use crate::error::CliError;

pub fn run_category(command: CategoryCommands, ctx: &AppContext) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let user_id = ctx.user_id()?;
    let device = ctx.device_id();

    match command {
        CategoryCommands::Add {
            name,
            entry_type,
            color,
            icon,
        } => {
            let mut category = Category::new(normalize_name(&name)?, entry_type.into(), device);
            category.color = normalize_text_option(color);
            category.icon = normalize_text_option(icon);
            store.upsert(user_id, category.clone())?;
            println!("{}", category.id);
        }
        CategoryCommands::Delete { id } => {
            let mut category =
                resolve_record(&active::<Category>(store.as_ref(), user_id)?, &id)?;
            category.mark_deleted(device);
            store.upsert(user_id, category.clone())?;
            println!("{}", category.id);
        }
        CategoryCommands::List { json } => {
            let mut categories = active::<Category>(store.as_ref(), user_id)?;
            categories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
            if json {
                println!("{}", serde_json::to_string_pretty(&categories)?);
            } else {
                for line in format_category_lines(&categories) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}
