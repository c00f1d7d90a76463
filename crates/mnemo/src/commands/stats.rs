//! Stats command - show database statistics.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use mnemo_store::ConversationStore;

use super::Context;

/// Arguments for the stats command.
#[derive(Args, Debug)]
pub struct StatsArgs {}

/// Run the stats command.
///
/// Fails on an unmigrated database; run `mnemo migrate` first.
pub fn run(_args: StatsArgs, ctx: &Context) -> Result<()> {
    let store = ConversationStore::open_unmigrated(&ctx.database)?;
    let stats = store.stats()?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let dim = Style::new().dim();

    println!("{}", style("Database Statistics").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("Database: {}", ctx.database.display());
    println!();
    println!("Users:          {}", stats.user_count);
    println!("Conversations:  {}", stats.conversation_count);
    println!("Messages:       {}", stats.message_count);
    println!(
        "Memories:       {} ({} active)",
        stats.memory_entry_count, stats.active_memory_count
    );
    println!("Audit entries:  {}", stats.audit_count);
    println!();
    println!(
        "{}",
        dim.apply_to(format!(
            "schema v{}, {} embedding dimensions",
            stats.schema_version, stats.embedding_dimensions
        ))
    );

    Ok(())
}
