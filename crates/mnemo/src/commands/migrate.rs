//! Migrate command - apply pending schema migrations.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde_json::json;
use tracing::info;

use mnemo_store::{ConversationStore, LATEST_VERSION, find_unit};

use super::Context;

/// Arguments for the migrate command.
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Stop after this version instead of migrating to the latest
    #[arg(long, value_name = "VERSION")]
    pub to: Option<u32>,
}

/// Run the migrate command.
pub fn run(args: MigrateArgs, ctx: &Context) -> Result<()> {
    let dim = Style::new().dim();

    if ctx.verbose {
        println!(
            "{}",
            dim.apply_to(format!("Database: {}", ctx.database.display()))
        );
    }

    let store = ConversationStore::open_unmigrated(&ctx.database)?;
    let applied = match args.to {
        Some(target) => store.migrate_to(target)?,
        None => store.migrate_all()?,
    };
    let version = store.schema_version()?;
    info!(
        "Migrated {} ({} units applied, now at version {version})",
        ctx.database.display(),
        applied.len()
    );

    if ctx.json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "applied": applied,
                "schema_version": version,
                "latest_version": LATEST_VERSION,
            }))?
        );
        return Ok(());
    }

    if applied.is_empty() {
        println!(
            "{} (schema version {version})",
            dim.apply_to("Nothing to apply")
        );
    } else {
        for v in &applied {
            let name = find_unit(*v).map(|u| u.name).unwrap_or("?");
            println!("{} {v:03} {name}", style("applied").green());
        }
        println!();
        println!("Schema version: {}", style(version).bold());
    }

    Ok(())
}
