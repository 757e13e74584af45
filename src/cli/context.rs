use anyhow::Result;
use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};
use std::path::Path;

use crate::lookup::ContextCache;

#[derive(Subcommand, Debug, Clone)]
pub enum ContextCommands {
    /// Show cached lookup results
    #[command(visible_alias = "ls")]
    Show,
    /// Delete the context file so the next synth looks everything up again
    Reset,
}

pub fn handle_context_command(cmd: ContextCommands, context_file: &Path) -> Result<()> {
    match cmd {
        ContextCommands::Show => {
            let cache = ContextCache::load(context_file)?;
            if cache.is_empty() {
                println!("No cached lookups in {}", cache.path().display());
                return Ok(());
            }
            println!("{}", context_table(&cache)?);
            println!("{} entries in {}", cache.len(), cache.path().display());
            Ok(())
        }
        ContextCommands::Reset => {
            if ContextCache::reset(context_file)? {
                println!("✓ Removed {}", context_file.display());
            } else {
                println!("No context file at {}", context_file.display());
            }
            Ok(())
        }
    }
}

fn context_table(cache: &ContextCache) -> Result<Table> {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("KEY").add_attribute(Attribute::Bold),
            Cell::new("VALUE").add_attribute(Attribute::Bold),
        ]);

    for (key, value) in cache.entries() {
        table.add_row(vec![
            Cell::new(key),
            Cell::new(serde_json::to_string_pretty(value)?),
        ]);
    }
    Ok(table)
}
