//! cli
//!
//! Command-line interface layer.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Load configuration and map flags onto it
//! - Delegate to command handlers
//!
//! The CLI layer is thin: handlers in [`commands`] wire the library layers
//! together and never reach around them.

pub mod args;
pub mod commands;

pub use args::{Cli, Command, Shell};

use anyhow::Result;

use crate::core::config::Config;
use crate::ui::output::Verbosity;

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`. Library errors cross
/// the boundary intact so `main` can render the full cause chain.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    let verbosity = Verbosity::from_flags(cli.quiet, cli.debug);
    let config = Config::load()?;
    commands::dispatch(cli.command, verbosity, &config).map_err(anyhow::Error::new)
}
