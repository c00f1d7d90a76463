//! CLI command handlers.

pub mod migrate;
pub mod stats;
pub mod status;
pub mod verify;

use std::path::PathBuf;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Database file to operate on.
    pub database: PathBuf,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}
