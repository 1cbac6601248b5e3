//! storage
//!
//! The repository oracle the session drivers read from.
//!
//! # Overview
//!
//! [`Storage`] is the seam between the protocol layer and whatever holds
//! the revisions. Drivers only ever ask read questions (what is at this
//! path, at this revision) plus the three lock operations; they never see
//! how revisions are stored. Methods take `&self` so one repository can
//! serve several concurrent read sessions; implementations handle their
//! own interior locking.
//!
//! Lookups that merely find nothing answer `Ok(None)` or
//! `NodeKind::None`. An `Err` from this trait always means the question
//! itself could not be answered.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::{DateTime, Utc};

use crate::core::error::Result;
use crate::core::lock::{Lock, LockToken};
use crate::core::types::{Dirent, NodeKind, PropName, PropValue, RelPath, Revnum};
use crate::log::LogEntry;

pub mod memory;

pub use memory::MemoryRepo;

/// Parameters for acquiring a lock.
#[derive(Debug, Clone)]
pub struct LockParams {
    /// Who is taking the lock.
    pub owner: String,
    /// Free-form note attached to the lock.
    pub comment: Option<String>,
    /// When the lock lapses; `None` means it never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Read and lock access to a revisioned tree store.
pub trait Storage {
    /// The newest revision number.
    fn head_revision(&self) -> Result<Revnum>;

    /// The kind of node at `path` in `revision`; `NodeKind::None` when
    /// absent.
    fn check_path(&self, path: &RelPath, revision: Revnum) -> Result<NodeKind>;

    /// Entry summary for `path` in `revision`; `Ok(None)` when absent.
    fn stat(&self, path: &RelPath, revision: Revnum) -> Result<Option<Dirent>>;

    /// Entries of the directory at `path` in `revision`, keyed by name.
    fn list_directory(
        &self,
        path: &RelPath,
        revision: Revnum,
    ) -> Result<BTreeMap<String, Dirent>>;

    /// Properties of the node at `path` in `revision`.
    fn node_props(
        &self,
        path: &RelPath,
        revision: Revnum,
    ) -> Result<BTreeMap<PropName, PropValue>>;

    /// A reader over the content of the file at `path` in `revision`.
    ///
    /// Content is streamed so drivers stay in bounded memory regardless of
    /// file size.
    fn open_contents(&self, path: &RelPath, revision: Revnum) -> Result<Box<dyn Read + 'static>>;

    /// Revisions in which `path` changed, ascending.
    fn revisions_for_path(&self, path: &RelPath) -> Result<Vec<Revnum>>;

    /// Log metadata for one revision; `Ok(None)` when out of range.
    fn revision_info(&self, revision: Revnum) -> Result<Option<LogEntry>>;

    /// The current lock on `path`, if any. Expired locks are still
    /// reported; callers decide what expiry means for them.
    fn get_lock(&self, path: &RelPath) -> Result<Option<Lock>>;

    /// Acquire a lock on `path`.
    ///
    /// Fails with `LockConflict` while a valid lock held by someone else
    /// exists; an expired lock may be taken over.
    fn lock(&self, path: &RelPath, params: &LockParams) -> Result<Lock>;

    /// Release the lock on `path`.
    ///
    /// The presented token must authorize the release unless `break_lock`
    /// is set, which removes whatever lock is there.
    fn unlock(&self, path: &RelPath, token: Option<&LockToken>, break_lock: bool) -> Result;
}
