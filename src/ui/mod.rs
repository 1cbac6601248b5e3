//! ui
//!
//! Output utilities.
//!
//! All user-facing text goes through [`output`] so quiet/debug handling
//! stays consistent across subcommands.

pub mod output;

pub use output::Verbosity;
