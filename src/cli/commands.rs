//! cli::commands
//!
//! Subcommand handlers. Each handler loads the repository dump, runs one
//! operation through the library layers, and prints through [`ui::output`]
//! so quiet/debug behave uniformly.

use std::path::Path;

use chrono::{Duration, Utc};
use clap::CommandFactory;
use clap_complete::{generate, shells};

use crate::cli::args::{Cli, Command, Shell};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorCode, Result};
use crate::core::lock::LockToken;
use crate::core::types::{NodeKind, RelPath, RevisionSpec, Revnum};
use crate::log::{replay, Direction, LogEntry, LogRequest};
use crate::session::{Session, WorkingCopyEditor};
use crate::storage::memory::MemoryRepo;
use crate::storage::{LockParams, Storage};
use crate::ui::output::{self, Verbosity};

const SEPARATOR: &str =
    "------------------------------------------------------------------------";

/// Dispatch one parsed command.
pub fn dispatch(command: Command, verbosity: Verbosity, config: &Config) -> Result {
    match command {
        Command::Checkout {
            repo,
            dest,
            revision,
        } => checkout(&repo, &dest, revision, verbosity, config),
        Command::Log {
            repo,
            path,
            revisions,
            reverse,
            verbose,
            limit,
        } => log(&repo, path, revisions, reverse, verbose, limit, verbosity, config),
        Command::Ls {
            repo,
            path,
            revision,
        } => ls(&repo, path, revision, verbosity),
        Command::Lock {
            repo,
            path,
            owner,
            comment,
            expires_in,
        } => lock(&repo, &path, owner, comment, expires_in, verbosity),
        Command::Unlock {
            repo,
            path,
            token,
            break_lock,
        } => unlock(&repo, &path, token, break_lock, verbosity),
        Command::Completion { shell } => {
            completion(shell);
            Ok(())
        }
    }
}

fn parse_path(arg: Option<String>) -> Result<RelPath> {
    match arg {
        None => Ok(RelPath::root()),
        Some(s) => {
            let trimmed = s.trim_matches('/');
            if trimmed.is_empty() {
                Ok(RelPath::root())
            } else {
                Ok(RelPath::new(trimmed)?)
            }
        }
    }
}

/// Parse an inclusive `N:M` range; a bare `N` pins a single revision.
fn parse_range(arg: &str) -> Result<(Revnum, Revnum)> {
    let invalid = || {
        Error::new(
            ErrorCode::Validation,
            format!("invalid revision range '{}': expected N or N:M", arg),
        )
    };
    match arg.split_once(':') {
        Some((lo, hi)) => {
            let lo = lo.parse::<u64>().map_err(|_| invalid())?;
            let hi = hi.parse::<u64>().map_err(|_| invalid())?;
            Ok((Revnum::new(lo.min(hi)), Revnum::new(lo.max(hi))))
        }
        None => {
            let rev = arg.parse::<u64>().map_err(|_| invalid())?;
            Ok((Revnum::new(rev), Revnum::new(rev)))
        }
    }
}

fn checkout(
    repo_path: &Path,
    dest: &Path,
    revision: Option<u64>,
    verbosity: Verbosity,
    config: &Config,
) -> Result {
    let repo = MemoryRepo::load(repo_path)?;
    let session = Session::new(&repo).with_chunk_size(config.chunk_size());
    output::debug(
        format!("streaming with {} byte windows", config.chunk_size()),
        verbosity,
    );
    let mut editor = WorkingCopyEditor::new(dest)?;
    let revision = session.checkout(revision.map(Revnum::new), &mut editor)?;
    output::print(
        format!("Checked out revision {} into '{}'", revision, dest.display()),
        verbosity,
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn log(
    repo_path: &Path,
    path: Option<String>,
    revisions: Option<String>,
    reverse: bool,
    verbose: bool,
    limit: Option<usize>,
    verbosity: Verbosity,
    config: &Config,
) -> Result {
    let repo = MemoryRepo::load(repo_path)?;
    let range = revisions.as_deref().map(parse_range).transpose()?;
    let path = path.map(Some).map(parse_path).transpose()?;
    let request = LogRequest {
        path,
        start: range.map(|(lo, _)| lo),
        end: range.map(|(_, hi)| hi),
        direction: if reverse {
            Direction::Ascending
        } else {
            Direction::Descending
        },
        with_paths: verbose,
        limit: limit.or(config.log_limit()),
    };
    let mut printed_any = false;
    let mut receiver = |entry: &LogEntry| -> Result {
        printed_any = true;
        output::print(SEPARATOR, verbosity);
        output::print(render_entry(entry), verbosity);
        Ok(())
    };
    replay(&repo, &request, &mut receiver)?;
    if printed_any {
        output::print(SEPARATOR, verbosity);
    }
    Ok(())
}

fn render_entry(entry: &LogEntry) -> String {
    let mut out = String::new();
    let author = entry.author.as_deref().unwrap_or("(no author)");
    let date = entry
        .date
        .map(|d| d.format("%Y-%m-%d %H:%M:%S %z").to_string())
        .unwrap_or_else(|| "(no date)".to_string());
    out.push_str(&format!("{} | {} | {}\n", entry.revision, author, date));
    if let Some(paths) = &entry.changed_paths {
        out.push_str("Changed paths:\n");
        for (path, change) in paths {
            out.push_str(&format!("   {} /{}", change.action.as_char(), path.as_str()));
            if let Some(copy) = &change.copy_source {
                out.push_str(&format!(" (from /{}:{})", copy.path.as_str(), copy.revision));
            }
            out.push('\n');
        }
    }
    out.push('\n');
    out.push_str(entry.message.as_deref().unwrap_or(""));
    out
}

fn ls(
    repo_path: &Path,
    path: Option<String>,
    revision: Option<u64>,
    verbosity: Verbosity,
) -> Result {
    let repo = MemoryRepo::load(repo_path)?;
    let session = Session::new(&repo);
    let revision = session.resolve_revision(RevisionSpec::from_arg(revision))?;
    let path = parse_path(path)?;
    match repo.check_path(&path, revision)? {
        NodeKind::Dir => {}
        NodeKind::None => {
            return Err(Error::new(
                ErrorCode::Validation,
                format!("'{}' does not exist in {}", path, revision),
            ))
        }
        _ => {
            return Err(Error::new(
                ErrorCode::Validation,
                format!("'{}' is not a directory in {}", path, revision),
            ))
        }
    }
    for (name, entry) in repo.list_directory(&path, revision)? {
        let suffix = if entry.kind == NodeKind::Dir { "/" } else { "" };
        output::print(
            format!(
                "{:>7} {:>10} {:>8}  {}{}",
                entry.created_rev,
                entry.last_author.as_deref().unwrap_or("?"),
                entry.size,
                name,
                suffix
            ),
            verbosity,
        );
    }
    Ok(())
}

fn lock(
    repo_path: &Path,
    path: &str,
    owner: Option<String>,
    comment: Option<String>,
    expires_in: Option<u64>,
    verbosity: Verbosity,
) -> Result {
    let repo = MemoryRepo::load(repo_path)?;
    let path = RelPath::new(path.trim_matches('/'))?;
    let owner = owner
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "anonymous".to_string());
    let expires_at = expires_in.map(|secs| Utc::now() + Duration::seconds(secs as i64));
    let lock = repo.lock(
        &path,
        &LockParams {
            owner,
            comment,
            expires_at,
        },
    )?;
    repo.save(repo_path)?;
    output::print(
        format!("'{}' locked by '{}'.", lock.path, lock.owner),
        verbosity,
    );
    // The token is the caller's proof of ownership; print it even in
    // quiet mode so scripts can capture it.
    println!("{}", lock.token.as_str());
    Ok(())
}

fn unlock(
    repo_path: &Path,
    path: &str,
    token: Option<String>,
    break_lock: bool,
    verbosity: Verbosity,
) -> Result {
    let repo = MemoryRepo::load(repo_path)?;
    let path = RelPath::new(path.trim_matches('/'))?;
    let token = token.map(LockToken::from_string);
    if break_lock {
        if let Some(existing) = repo.get_lock(&path)? {
            output::warn(
                format!("breaking lock held by '{}'", existing.owner),
                verbosity,
            );
        }
    }
    repo.unlock(&path, token.as_ref(), break_lock)?;
    repo.save(repo_path)?;
    output::print(format!("'{}' unlocked.", path), verbosity);
    Ok(())
}

fn completion(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    match shell {
        Shell::Bash => generate(shells::Bash, &mut cmd, &name, &mut std::io::stdout()),
        Shell::Zsh => generate(shells::Zsh, &mut cmd, &name, &mut std::io::stdout()),
        Shell::Fish => generate(shells::Fish, &mut cmd, &name, &mut std::io::stdout()),
        Shell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, &name, &mut std::io::stdout())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_forms() {
        assert_eq!(
            parse_range("2:5").unwrap(),
            (Revnum::new(2), Revnum::new(5))
        );
        // Reversed bounds normalize.
        assert_eq!(
            parse_range("5:2").unwrap(),
            (Revnum::new(2), Revnum::new(5))
        );
        assert_eq!(
            parse_range("7").unwrap(),
            (Revnum::new(7), Revnum::new(7))
        );
        assert!(parse_range("a:b").is_err());
        assert!(parse_range("").is_err());
    }

    #[test]
    fn path_arguments_normalize() {
        assert!(parse_path(None).unwrap().is_root());
        assert!(parse_path(Some("/".into())).unwrap().is_root());
        assert_eq!(
            parse_path(Some("/trunk/a.txt/".into())).unwrap().as_str(),
            "trunk/a.txt"
        );
        assert!(parse_path(Some("a//b".into())).is_err());
    }
}
