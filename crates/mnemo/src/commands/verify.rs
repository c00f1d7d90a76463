//! Verify command - check ledger checksums against the embedded SQL.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde_json::json;

use mnemo_store::ConversationStore;

use super::Context;

/// Arguments for the verify command.
#[derive(Args, Debug)]
pub struct VerifyArgs {}

/// Run the verify command.
pub fn run(_args: VerifyArgs, ctx: &Context) -> Result<()> {
    let store = ConversationStore::open_unmigrated(&ctx.database)?;
    let result = store.verify_migrations();

    if ctx.json_output {
        let report = match &result {
            Ok(()) => json!({"ok": true}),
            Err(e) => json!({"ok": false, "error": e.to_string()}),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        result?;
        return Ok(());
    }

    match result {
        Ok(()) => {
            let applied = store.applied_migrations()?;
            println!(
                "{} ({} applied migrations match)",
                style("OK").green().bold(),
                applied.len()
            );
            Ok(())
        }
        Err(e) => {
            let red = Style::new().red();
            eprintln!("{} {}", red.apply_to("Checksum mismatch:"), e);
            Err(e.into())
        }
    }
}
