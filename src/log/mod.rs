//! log
//!
//! The change-log receiver protocol.
//!
//! # Overview
//!
//! History travels as a stream of [`LogEntry`] values pushed into a
//! [`LogReceiver`], one call per revision, in the caller-selected
//! [`Direction`]. The producer owns each entry and its changed-path map for
//! the duration of one callback only; receivers copy out whatever they need
//! to keep. A receiver returning an error stops the traversal immediately
//! and the error propagates to the caller of [`replay`], wrapped so the
//! failing revision is named.
//!
//! Every metadata field of an entry is optional. A changed-path map is
//! attached only when the caller asked for one, so cheap traversals skip
//! the per-revision path data entirely.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{ErrorCode, Result, ResultExt};
use crate::core::types::{CopySource, RelPath, Revnum};
use crate::storage::Storage;

use chrono::{DateTime, Utc};

/// What happened to one path in one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Add,
    Delete,
    Replace,
    Modify,
}

impl ChangeAction {
    /// Single-letter rendering used by log output.
    pub fn as_char(self) -> char {
        match self {
            ChangeAction::Add => 'A',
            ChangeAction::Delete => 'D',
            ChangeAction::Replace => 'R',
            ChangeAction::Modify => 'M',
        }
    }
}

/// One changed path inside a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedPath {
    /// The action applied to the path.
    pub action: ChangeAction,
    /// Copy history, present when an add or replace was a copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_source: Option<CopySource>,
}

/// One revision's worth of history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The revision this entry describes.
    pub revision: Revnum,
    /// Commit author, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Commit timestamp, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// Commit message, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Paths changed in this revision; `None` when not requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_paths: Option<BTreeMap<RelPath, ChangedPath>>,
}

/// Consumer side of the log protocol.
///
/// Implemented for free by any `FnMut(&LogEntry) -> Result` closure.
pub trait LogReceiver {
    /// Accept one revision's entry. Returning an error stops the traversal.
    fn receive(&mut self, entry: &LogEntry) -> Result;
}

impl<F: FnMut(&LogEntry) -> Result> LogReceiver for F {
    fn receive(&mut self, entry: &LogEntry) -> Result {
        self(entry)
    }
}

/// Traversal order over a revision range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Newest first.
    #[default]
    Descending,
    /// Oldest first.
    Ascending,
}

/// What a [`replay`] traversal should cover.
#[derive(Debug, Clone, Default)]
pub struct LogRequest {
    /// Only include revisions touching this path (or anything under it).
    pub path: Option<RelPath>,
    /// Inclusive revision range; `None` ends default to 1 and head.
    pub start: Option<Revnum>,
    /// Inclusive upper bound of the range.
    pub end: Option<Revnum>,
    /// Traversal order.
    pub direction: Direction,
    /// Attach changed-path maps to the entries.
    pub with_paths: bool,
    /// Stop after this many delivered entries.
    pub limit: Option<usize>,
}

/// Drive a log traversal out of `storage` into `receiver`.
///
/// Revision 0 is the empty tree and never appears in log output. Returns
/// the number of entries delivered.
pub fn replay(
    storage: &dyn Storage,
    request: &LogRequest,
    receiver: &mut dyn LogReceiver,
) -> Result<usize> {
    let head = storage.head_revision()?;
    let lo = request.start.map_or(1, Revnum::get).max(1);
    let hi = request.end.map_or_else(|| head.get(), Revnum::get).min(head.get());
    if lo > hi {
        return Ok(0);
    }

    let revs: Vec<u64> = match request.direction {
        Direction::Ascending => (lo..=hi).collect(),
        Direction::Descending => (lo..=hi).rev().collect(),
    };

    let mut delivered = 0usize;
    for rev in revs {
        if let Some(limit) = request.limit {
            if delivered >= limit {
                break;
            }
        }
        let rev = Revnum::new(rev);
        let mut entry = match storage.revision_info(rev)? {
            Some(entry) => entry,
            None => continue,
        };
        if let Some(filter) = &request.path {
            let touches = entry.changed_paths.as_ref().is_some_and(|paths| {
                paths
                    .keys()
                    .any(|p| p.starts_with(filter) || filter.starts_with(p))
            });
            if !touches {
                continue;
            }
        }
        if !request.with_paths {
            entry.changed_paths = None;
        }
        receiver.receive(&entry).with_context(ErrorCode::Validation, || {
            format!("log receiver failed at {}", rev)
        })?;
        delivered += 1;
    }
    Ok(delivered)
}

/// A receiver that collects entries into a vector. Test and CLI helper.
#[derive(Debug, Default)]
pub struct CollectingReceiver {
    entries: Vec<LogEntry>,
}

impl CollectingReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}

impl LogReceiver for CollectingReceiver {
    fn receive(&mut self, entry: &LogEntry) -> Result {
        self.entries.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::storage::memory::MemoryRepo;

    fn rel(s: &str) -> RelPath {
        RelPath::new(s).unwrap()
    }

    fn fixture() -> MemoryRepo {
        let repo = MemoryRepo::new();
        repo.commit_files("alice", "add a", &[("a.txt", "one")])
            .unwrap();
        repo.commit_files("bob", "add b", &[("b.txt", "two")]).unwrap();
        repo.commit_files("alice", "edit a", &[("a.txt", "three")])
            .unwrap();
        repo
    }

    #[test]
    fn descending_by_default() {
        let repo = fixture();
        let mut rx = CollectingReceiver::new();
        let n = replay(&repo, &LogRequest::default(), &mut rx).unwrap();
        assert_eq!(n, 3);
        let revs: Vec<u64> = rx.entries().iter().map(|e| e.revision.get()).collect();
        assert_eq!(revs, vec![3, 2, 1]);
    }

    #[test]
    fn ascending_when_asked() {
        let repo = fixture();
        let mut rx = CollectingReceiver::new();
        let request = LogRequest {
            direction: Direction::Ascending,
            ..LogRequest::default()
        };
        replay(&repo, &request, &mut rx).unwrap();
        let revs: Vec<u64> = rx.entries().iter().map(|e| e.revision.get()).collect();
        assert_eq!(revs, vec![1, 2, 3]);
    }

    #[test]
    fn limit_truncates() {
        let repo = fixture();
        let mut rx = CollectingReceiver::new();
        let request = LogRequest {
            limit: Some(2),
            ..LogRequest::default()
        };
        let n = replay(&repo, &request, &mut rx).unwrap();
        assert_eq!(n, 2);
        let revs: Vec<u64> = rx.entries().iter().map(|e| e.revision.get()).collect();
        assert_eq!(revs, vec![3, 2]);
    }

    #[test]
    fn path_filter_selects_touching_revisions() {
        let repo = fixture();
        let mut rx = CollectingReceiver::new();
        let request = LogRequest {
            path: Some(rel("a.txt")),
            ..LogRequest::default()
        };
        replay(&repo, &request, &mut rx).unwrap();
        let revs: Vec<u64> = rx.entries().iter().map(|e| e.revision.get()).collect();
        assert_eq!(revs, vec![3, 1]);
    }

    #[test]
    fn changed_paths_only_when_requested() {
        let repo = fixture();
        let mut rx = CollectingReceiver::new();
        replay(&repo, &LogRequest::default(), &mut rx).unwrap();
        assert!(rx.entries().iter().all(|e| e.changed_paths.is_none()));

        let mut rx = CollectingReceiver::new();
        let request = LogRequest {
            with_paths: true,
            ..LogRequest::default()
        };
        replay(&repo, &request, &mut rx).unwrap();
        let newest = &rx.entries()[0];
        let paths = newest.changed_paths.as_ref().unwrap();
        assert_eq!(paths[&rel("a.txt")].action, ChangeAction::Modify);
    }

    #[test]
    fn receiver_error_stops_traversal() {
        let repo = fixture();
        let mut seen = 0usize;
        let mut failing = |_: &LogEntry| -> Result {
            seen += 1;
            if seen == 2 {
                Err(Error::new(ErrorCode::Validation, "enough"))
            } else {
                Ok(())
            }
        };
        let err = replay(&repo, &LogRequest::default(), &mut failing).unwrap_err();
        assert_eq!(seen, 2);
        assert_eq!(err.root_cause().message(), "enough");
        assert!(err.message().contains("r2"));
    }

    #[test]
    fn empty_range_is_empty() {
        let repo = fixture();
        let mut rx = CollectingReceiver::new();
        let request = LogRequest {
            start: Some(Revnum::new(5)),
            end: Some(Revnum::new(2)),
            ..LogRequest::default()
        };
        assert_eq!(replay(&repo, &request, &mut rx).unwrap(), 0);
    }

    #[test]
    fn action_letters() {
        assert_eq!(ChangeAction::Add.as_char(), 'A');
        assert_eq!(ChangeAction::Delete.as_char(), 'D');
        assert_eq!(ChangeAction::Replace.as_char(), 'R');
        assert_eq!(ChangeAction::Modify.as_char(), 'M');
    }
}
