//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! Available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--debug`: Enable debug output
//! - `--quiet` / `-q`: Minimal output

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Treewire - drive tree-delta edits against repository dumps
#[derive(Parser, Debug)]
#[command(name = "tw")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check out a revision into a new directory
    ///
    /// Drives a full checkout of the repository dump into DEST. The
    /// destination is created atomically: either the whole revision lands
    /// or nothing does.
    Checkout {
        /// Repository dump file (JSON)
        repo: PathBuf,

        /// Destination directory (must not exist)
        dest: PathBuf,

        /// Revision to check out (defaults to head)
        #[arg(short = 'r', long)]
        revision: Option<u64>,
    },

    /// Show revision history
    Log {
        /// Repository dump file (JSON)
        repo: PathBuf,

        /// Only show revisions touching this path
        #[arg(long)]
        path: Option<String>,

        /// Revision range, inclusive (e.g. 2:5)
        #[arg(long, value_name = "N:M")]
        revisions: Option<String>,

        /// Oldest revision first
        #[arg(long)]
        reverse: bool,

        /// Also list changed paths per revision
        #[arg(short, long)]
        verbose: bool,

        /// Stop after this many entries
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List the entries of a directory
    Ls {
        /// Repository dump file (JSON)
        repo: PathBuf,

        /// Directory to list (repository root when omitted)
        path: Option<String>,

        /// Revision to list at (defaults to head)
        #[arg(short = 'r', long)]
        revision: Option<u64>,
    },

    /// Lock a file path in the repository dump
    Lock {
        /// Repository dump file (JSON); rewritten in place
        repo: PathBuf,

        /// File path to lock
        path: String,

        /// Lock owner (defaults to $USER)
        #[arg(long)]
        owner: Option<String>,

        /// Note attached to the lock
        #[arg(short = 'm', long)]
        comment: Option<String>,

        /// Seconds until the lock expires (never, when omitted)
        #[arg(long, value_name = "SECONDS")]
        expires_in: Option<u64>,
    },

    /// Release a lock
    Unlock {
        /// Repository dump file (JSON); rewritten in place
        repo: PathBuf,

        /// File path to unlock
        path: String,

        /// Lock token proving ownership
        #[arg(long)]
        token: Option<String>,

        /// Remove the lock without presenting its token
        #[arg(long)]
        break_lock: bool,
    },

    /// Generate shell completion scripts
    Completion {
        /// Target shell
        shell: Shell,
    },
}

/// Shells we can generate completions for.
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}
