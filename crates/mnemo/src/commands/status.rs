//! Status command - show applied and pending migrations.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde_json::json;

use mnemo_store::{ConversationStore, LATEST_VERSION};

use super::Context;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {}

/// Run the status command.
pub fn run(_args: StatusArgs, ctx: &Context) -> Result<()> {
    let store = ConversationStore::open_unmigrated(&ctx.database)?;
    let applied = store.applied_migrations()?;
    let pending = store.pending_migrations()?;
    let version = store.schema_version()?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "database": ctx.database,
                "schema_version": version,
                "latest_version": LATEST_VERSION,
                "applied": applied,
                "pending": pending.iter().map(|u| json!({
                    "version": u.version,
                    "name": u.name,
                })).collect::<Vec<_>>(),
            }))?
        );
        return Ok(());
    }

    let dim = Style::new().dim();

    println!("{}", style("Migration Status").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("Database: {}", ctx.database.display());
    println!(
        "Schema version: {} (latest: {})",
        style(version).bold(),
        LATEST_VERSION
    );
    println!();

    if applied.is_empty() {
        println!("{}", dim.apply_to("No migrations applied"));
    } else {
        for m in &applied {
            print!(
                "{} {:03} {}",
                style("applied").green(),
                m.version,
                m.name
            );
            if ctx.verbose {
                print!(" {}", dim.apply_to(format!("({} @ {})", m.checksum, m.applied_at)));
            }
            println!();
        }
    }
    for u in &pending {
        println!("{} {:03} {}", style("pending").yellow(), u.version, u.name);
    }

    Ok(())
}
