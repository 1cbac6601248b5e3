//! storage::memory
//!
//! In-memory reference repository.
//!
//! # Overview
//!
//! [`MemoryRepo`] holds the whole revision history as a vector of immutable
//! tree snapshots plus per-revision log metadata. Revision 0 is always the
//! empty tree. Each snapshot carries a per-path creation map (the last
//! revision in which that node changed) so the update driver can prune
//! unchanged subtrees without walking them.
//!
//! The repository is `Mutex`-guarded internally, so several read sessions
//! can share one `&MemoryRepo`. The whole store round-trips through a JSON
//! dump, which is what the CLI loads and rewrites.
//!
//! [`CommitEditor`] is the write path: it receives a tree-delta edit,
//! validates lock tokens before every mutation, and appends one new
//! revision on `close_edit`.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorCode, Result, ResultExt};
use crate::core::lock::{Lock, LockToken};
use crate::core::types::{
    Checksum, CopySource, Dirent, NodeKind, PropName, PropValue, RelPath, Revnum,
};
use crate::delta::editor::{DeltaHandle, DirBaton, Editor, FileBaton};
use crate::delta::tree::{Tree, TreeEditor, TreeNode};
use crate::delta::window::DeltaWindow;
use crate::log::{ChangeAction, ChangedPath, LogEntry};
use crate::storage::{LockParams, Storage};

#[derive(Debug, Clone)]
struct RevisionRecord {
    tree: Tree,
    author: Option<String>,
    date: Option<DateTime<Utc>>,
    message: Option<String>,
    changed_paths: BTreeMap<RelPath, ChangedPath>,
    /// Per-path last-changed revision, covering every node in `tree`.
    created: BTreeMap<RelPath, Revnum>,
}

#[derive(Debug)]
struct Inner {
    revisions: Vec<RevisionRecord>,
    locks: HashMap<RelPath, Lock>,
}

/// On-disk dump schema. The creation maps are derived, not stored.
#[derive(Debug, Serialize, Deserialize)]
struct RepoDump {
    revisions: Vec<RevisionDump>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    locks: Vec<Lock>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RevisionDump {
    tree: Tree,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    changed_paths: BTreeMap<RelPath, ChangedPath>,
}

/// Everything a commit needs besides the edit itself.
#[derive(Debug, Clone, Default)]
pub struct CommitParams {
    pub author: Option<String>,
    pub message: Option<String>,
    /// Lock tokens presented alongside the edit's mutations.
    pub tokens: Vec<LockToken>,
}

/// Serde-loadable in-memory repository.
#[derive(Debug)]
pub struct MemoryRepo {
    inner: Mutex<Inner>,
}

impl Default for MemoryRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk every node of a tree, root included.
fn walk_nodes<'a>(node: &'a TreeNode, at: RelPath, out: &mut Vec<(RelPath, &'a TreeNode)>) {
    if let Some(entries) = node.entries() {
        for (name, child) in entries {
            let child_path = at.join(name).expect("tree entry names are valid");
            walk_nodes(child, child_path, out);
        }
    }
    out.push((at, node));
}

fn creation_map(
    prev: Option<&RevisionRecord>,
    tree: &Tree,
    revision: Revnum,
) -> BTreeMap<RelPath, Revnum> {
    let mut nodes = Vec::new();
    walk_nodes(tree.root(), RelPath::root(), &mut nodes);
    let mut created = BTreeMap::new();
    for (path, node) in nodes {
        let inherited = prev.and_then(|p| {
            match p.tree.get(&path) {
                Some(old) if old == node => p.created.get(&path).copied(),
                _ => None,
            }
        });
        created.insert(path, inherited.unwrap_or(revision));
    }
    created
}

impl MemoryRepo {
    /// A fresh repository holding only the empty revision 0.
    pub fn new() -> Self {
        let rev0 = RevisionRecord {
            tree: Tree::empty(),
            author: None,
            date: None,
            message: None,
            changed_paths: BTreeMap::new(),
            created: creation_map(None, &Tree::empty(), Revnum::ZERO),
        };
        Self {
            inner: Mutex::new(Inner {
                revisions: vec![rev0],
                locks: HashMap::new(),
            }),
        }
    }

    fn guard(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::new(ErrorCode::Storage, "repository mutex poisoned"))
    }

    /// Parse a repository from its JSON dump.
    pub fn from_json(json: &str) -> Result<Self> {
        let dump: RepoDump = serde_json::from_str(json)
            .map_err(|e| Error::new(ErrorCode::Storage, format!("malformed repository dump: {}", e)))?;
        if dump.revisions.is_empty() {
            return Err(Error::new(
                ErrorCode::Storage,
                "repository dump holds no revisions",
            ));
        }
        let mut revisions: Vec<RevisionRecord> = Vec::with_capacity(dump.revisions.len());
        for (idx, rev) in dump.revisions.into_iter().enumerate() {
            let created = creation_map(revisions.last(), &rev.tree, Revnum::new(idx as u64));
            revisions.push(RevisionRecord {
                tree: rev.tree,
                author: rev.author,
                date: rev.date,
                message: rev.message,
                changed_paths: rev.changed_paths,
                created,
            });
        }
        let locks = dump
            .locks
            .into_iter()
            .map(|l| (l.path.clone(), l))
            .collect();
        Ok(Self {
            inner: Mutex::new(Inner { revisions, locks }),
        })
    }

    /// Render the repository as its JSON dump.
    pub fn to_json(&self) -> Result<String> {
        let inner = self.guard()?;
        let dump = RepoDump {
            revisions: inner
                .revisions
                .iter()
                .map(|r| RevisionDump {
                    tree: r.tree.clone(),
                    author: r.author.clone(),
                    date: r.date,
                    message: r.message.clone(),
                    changed_paths: r.changed_paths.clone(),
                })
                .collect(),
            locks: inner.locks.values().cloned().collect(),
        };
        serde_json::to_string_pretty(&dump)
            .map_err(|e| Error::new(ErrorCode::Storage, format!("dump serialization failed: {}", e)))
    }

    /// Load a repository dump from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).with_context(ErrorCode::Storage, || {
            format!("cannot read repository dump '{}'", path.display())
        })?;
        Self::from_json(&json)
    }

    /// Write the repository dump to a file.
    pub fn save(&self, path: &Path) -> Result {
        let json = self.to_json()?;
        std::fs::write(path, json).with_context(ErrorCode::Storage, || {
            format!("cannot write repository dump '{}'", path.display())
        })
    }

    /// A clone of the full tree at `revision`.
    pub fn tree_at(&self, revision: Revnum) -> Result<Tree> {
        let inner = self.guard()?;
        Ok(Self::record(&inner, revision)?.tree.clone())
    }

    fn record(inner: &Inner, revision: Revnum) -> Result<&RevisionRecord> {
        inner
            .revisions
            .get(revision.get() as usize)
            .ok_or_else(|| {
                Error::new(
                    ErrorCode::Storage,
                    format!("no such revision {}", revision),
                )
            })
    }

    fn dirent(inner: &Inner, revision: Revnum, path: &RelPath, node: &TreeNode) -> Dirent {
        let record = &inner.revisions[revision.get() as usize];
        let created_rev = record
            .created
            .get(path)
            .copied()
            .unwrap_or(Revnum::ZERO);
        let origin = &inner.revisions[created_rev.get() as usize];
        Dirent {
            kind: node.kind(),
            size: node.content().map_or(0, |c| c.len() as u64),
            has_props: !node.props().is_empty(),
            created_rev,
            time: origin.date,
            last_author: origin.author.clone(),
        }
    }

    /// Begin a commit against the current head.
    pub fn begin_commit(&self, params: CommitParams) -> Result<CommitEditor<'_>> {
        let base_rev = self.head_revision()?;
        let base = self.tree_at(base_rev)?;
        Ok(CommitEditor {
            repo: self,
            params,
            base_rev,
            inner: TreeEditor::new(base),
            paths: HashMap::new(),
            changed: BTreeMap::new(),
            committed: None,
        })
    }

    /// Commit a batch of file writes in one revision. Intermediate
    /// directories are created as needed.
    ///
    /// Convenience for fixtures and tests; real commits drive a
    /// [`CommitEditor`] through the session layer.
    pub fn commit_files(
        &self,
        author: &str,
        message: &str,
        files: &[(&str, &str)],
    ) -> Result<Revnum> {
        let base_rev = self.head_revision()?;
        let mut target = self.tree_at(base_rev)?;
        for (path, content) in files {
            let path = RelPath::new(*path)?;
            // Create missing ancestors.
            let mut ancestors: Vec<RelPath> = Vec::new();
            let mut cur = path.parent();
            while let Some(p) = cur {
                if p.is_root() {
                    break;
                }
                ancestors.push(p.clone());
                cur = p.parent();
            }
            for dir in ancestors.iter().rev() {
                if target.get(dir).is_none() {
                    target.insert(dir, TreeNode::dir())?;
                }
            }
            target.put(&path, TreeNode::file(content.as_bytes().to_vec()))?;
        }
        let mut editor = self.begin_commit(CommitParams {
            author: Some(author.to_string()),
            message: Some(message.to_string()),
            tokens: Vec::new(),
        })?;
        crate::session::Session::new(self).commit(base_rev, &target, &mut editor)?;
        editor
            .committed_revision()
            .ok_or_else(|| Error::new(ErrorCode::Storage, "commit produced no revision"))
    }

    /// Append a finished commit. Called by [`CommitEditor::close_edit`].
    fn finish_commit(
        &self,
        base_rev: Revnum,
        tree: Tree,
        params: &CommitParams,
        changed: BTreeMap<RelPath, ChangedPath>,
    ) -> Result<Revnum> {
        let mut inner = self.guard()?;
        let head = Revnum::new((inner.revisions.len() - 1) as u64);
        if head != base_rev {
            return Err(Error::new(
                ErrorCode::Storage,
                format!("commit built against {} but head is now {}", base_rev, head),
            ));
        }
        let revision = head.next();
        let created = creation_map(inner.revisions.last(), &tree, revision);
        inner.revisions.push(RevisionRecord {
            tree,
            author: params.author.clone(),
            date: Some(Utc::now()),
            message: params.message.clone(),
            changed_paths: changed,
            created,
        });
        Ok(revision)
    }

    /// Check that `tokens` authorize mutating `path` right now.
    ///
    /// Deletions of a directory must also clear every lock underneath it.
    fn check_lock_tokens(&self, path: &RelPath, tokens: &[LockToken], subtree: bool) -> Result {
        let inner = self.guard()?;
        let now = Utc::now();
        let relevant = inner.locks.values().filter(|lock| {
            lock.path == *path || (subtree && lock.path.starts_with(path))
        });
        for lock in relevant {
            let authorized = tokens.iter().any(|t| lock.authorizes(t, now));
            if !authorized {
                return Err(Error::new(
                    ErrorCode::LockConflict,
                    format!(
                        "path '{}' is locked by '{}' and no presented token authorizes the change",
                        lock.path, lock.owner
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl Storage for MemoryRepo {
    fn head_revision(&self) -> Result<Revnum> {
        let inner = self.guard()?;
        Ok(Revnum::new((inner.revisions.len() - 1) as u64))
    }

    fn check_path(&self, path: &RelPath, revision: Revnum) -> Result<NodeKind> {
        let inner = self.guard()?;
        Ok(Self::record(&inner, revision)?.tree.kind(path))
    }

    fn stat(&self, path: &RelPath, revision: Revnum) -> Result<Option<Dirent>> {
        let inner = self.guard()?;
        let record = Self::record(&inner, revision)?;
        Ok(record
            .tree
            .get(path)
            .map(|node| Self::dirent(&inner, revision, path, node)))
    }

    fn list_directory(
        &self,
        path: &RelPath,
        revision: Revnum,
    ) -> Result<BTreeMap<String, Dirent>> {
        let inner = self.guard()?;
        let record = Self::record(&inner, revision)?;
        let node = record.tree.get(path).ok_or_else(|| {
            Error::new(
                ErrorCode::Storage,
                format!("no node at '{}' in {}", path, revision),
            )
        })?;
        let entries = node.entries().ok_or_else(|| {
            Error::new(
                ErrorCode::Storage,
                format!("'{}' is not a directory in {}", path, revision),
            )
        })?;
        let mut out = BTreeMap::new();
        for (name, child) in entries {
            let child_path = path.join(name)?;
            out.insert(
                name.clone(),
                Self::dirent(&inner, revision, &child_path, child),
            );
        }
        Ok(out)
    }

    fn node_props(
        &self,
        path: &RelPath,
        revision: Revnum,
    ) -> Result<BTreeMap<PropName, PropValue>> {
        let inner = self.guard()?;
        let record = Self::record(&inner, revision)?;
        let node = record.tree.get(path).ok_or_else(|| {
            Error::new(
                ErrorCode::Storage,
                format!("no node at '{}' in {}", path, revision),
            )
        })?;
        Ok(node.props().clone())
    }

    fn open_contents(&self, path: &RelPath, revision: Revnum) -> Result<Box<dyn Read + 'static>> {
        let inner = self.guard()?;
        let record = Self::record(&inner, revision)?;
        let content = record.tree.file_content(path).ok_or_else(|| {
            Error::new(
                ErrorCode::Storage,
                format!("no file at '{}' in {}", path, revision),
            )
        })?;
        Ok(Box::new(Cursor::new(content.to_vec())))
    }

    fn revisions_for_path(&self, path: &RelPath) -> Result<Vec<Revnum>> {
        let inner = self.guard()?;
        let mut out = Vec::new();
        for (idx, record) in inner.revisions.iter().enumerate() {
            if record
                .changed_paths
                .keys()
                .any(|p| p == path || p.starts_with(path))
            {
                out.push(Revnum::new(idx as u64));
            }
        }
        Ok(out)
    }

    fn revision_info(&self, revision: Revnum) -> Result<Option<LogEntry>> {
        let inner = self.guard()?;
        Ok(inner
            .revisions
            .get(revision.get() as usize)
            .map(|record| LogEntry {
                revision,
                author: record.author.clone(),
                date: record.date,
                message: record.message.clone(),
                changed_paths: Some(record.changed_paths.clone()),
            }))
    }

    fn get_lock(&self, path: &RelPath) -> Result<Option<Lock>> {
        let inner = self.guard()?;
        Ok(inner.locks.get(path).cloned())
    }

    fn lock(&self, path: &RelPath, params: &LockParams) -> Result<Lock> {
        let head = self.head_revision()?;
        if self.check_path(path, head)? != NodeKind::File {
            return Err(Error::new(
                ErrorCode::Validation,
                format!("cannot lock '{}': not a file at head", path),
            ));
        }
        let mut inner = self.guard()?;
        let now = Utc::now();
        if let Some(existing) = inner.locks.get(path) {
            if !existing.is_expired(now) {
                return Err(Error::new(
                    ErrorCode::LockConflict,
                    format!("path '{}' is already locked by '{}'", path, existing.owner),
                ));
            }
        }
        let lock = Lock::issue(
            path.clone(),
            params.owner.clone(),
            params.comment.as_deref(),
            params.expires_at,
        );
        inner.locks.insert(path.clone(), lock.clone());
        Ok(lock)
    }

    fn unlock(&self, path: &RelPath, token: Option<&LockToken>, break_lock: bool) -> Result {
        let mut inner = self.guard()?;
        let existing = inner.locks.get(path).ok_or_else(|| {
            Error::new(
                ErrorCode::LockConflict,
                format!("path '{}' is not locked", path),
            )
        })?;
        if !break_lock {
            match token {
                Some(token) if *token == existing.token => {}
                _ => {
                    return Err(Error::new(
                        ErrorCode::LockConflict,
                        format!("presented token does not hold the lock on '{}'", path),
                    ))
                }
            }
        }
        inner.locks.remove(path);
        Ok(())
    }
}

/// An [`Editor`] that turns a finished edit into a new repository revision.
///
/// Lock tokens are validated before each mutating call; a failed check
/// leaves the repository untouched. The new revision exists only after
/// `close_edit` returns `Ok`.
#[derive(Debug)]
pub struct CommitEditor<'a> {
    repo: &'a MemoryRepo,
    params: CommitParams,
    base_rev: Revnum,
    inner: TreeEditor,
    /// Paths of batons handed out, keyed by the inner arena id.
    paths: HashMap<u64, RelPath>,
    changed: BTreeMap<RelPath, ChangedPath>,
    committed: Option<Revnum>,
}

impl CommitEditor<'_> {
    /// The revision this edit created, once `close_edit` succeeded.
    pub fn committed_revision(&self) -> Option<Revnum> {
        self.committed
    }

    fn record_change(
        &mut self,
        path: &RelPath,
        action: ChangeAction,
        copy_source: Option<&CopySource>,
    ) {
        let action = match (self.changed.get(path).map(|c| c.action), action) {
            // A delete followed by an add of the same path is a replace.
            (Some(ChangeAction::Delete), ChangeAction::Add) => ChangeAction::Replace,
            // First write wins for everything else; a later Modify never
            // downgrades an Add.
            (Some(prior), ChangeAction::Modify) => prior,
            (_, action) => action,
        };
        self.changed.insert(
            path.clone(),
            ChangedPath {
                action,
                copy_source: copy_source.cloned(),
            },
        );
    }

    fn path_of(&self, id: u64) -> Result<RelPath> {
        self.paths
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::new(ErrorCode::ProtocolViolation, "unknown baton"))
    }
}

impl Editor for CommitEditor<'_> {
    fn open_root(&mut self, base_revision: Option<Revnum>) -> Result<DirBaton> {
        let baton = self.inner.open_root(base_revision)?;
        self.paths.insert(baton.id().get(), RelPath::root());
        Ok(baton)
    }

    fn delete_entry(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        revision: Option<Revnum>,
    ) -> Result {
        self.repo
            .check_lock_tokens(path, &self.params.tokens, true)?;
        self.inner.delete_entry(dir, path, revision)?;
        self.record_change(path, ChangeAction::Delete, None);
        Ok(())
    }

    fn add_directory(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        copy_from: Option<&CopySource>,
    ) -> Result<DirBaton> {
        self.repo
            .check_lock_tokens(path, &self.params.tokens, false)?;
        let baton = self.inner.add_directory(dir, path, copy_from)?;
        self.paths.insert(baton.id().get(), path.clone());
        self.record_change(path, ChangeAction::Add, copy_from);
        Ok(baton)
    }

    fn open_directory(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        base_revision: Option<Revnum>,
    ) -> Result<DirBaton> {
        let baton = self.inner.open_directory(dir, path, base_revision)?;
        self.paths.insert(baton.id().get(), path.clone());
        Ok(baton)
    }

    fn change_dir_prop(
        &mut self,
        dir: &DirBaton,
        name: &PropName,
        value: Option<&PropValue>,
    ) -> Result {
        let path = self.path_of(dir.id().get())?;
        self.repo
            .check_lock_tokens(&path, &self.params.tokens, false)?;
        self.inner.change_dir_prop(dir, name, value)?;
        if !path.is_root() {
            self.record_change(&path, ChangeAction::Modify, None);
        }
        Ok(())
    }

    fn close_directory(&mut self, dir: DirBaton) -> Result {
        self.paths.remove(&dir.id().get());
        self.inner.close_directory(dir)
    }

    fn add_file(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        copy_from: Option<&CopySource>,
    ) -> Result<FileBaton> {
        self.repo
            .check_lock_tokens(path, &self.params.tokens, false)?;
        let baton = self.inner.add_file(dir, path, copy_from)?;
        self.paths.insert(baton.id().get(), path.clone());
        self.record_change(path, ChangeAction::Add, copy_from);
        Ok(baton)
    }

    fn open_file(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        base_revision: Option<Revnum>,
    ) -> Result<FileBaton> {
        let baton = self.inner.open_file(dir, path, base_revision)?;
        self.paths.insert(baton.id().get(), path.clone());
        Ok(baton)
    }

    fn apply_textdelta(
        &mut self,
        file: &FileBaton,
        base_checksum: Option<&Checksum>,
    ) -> Result<DeltaHandle> {
        let path = self.path_of(file.id().get())?;
        self.repo
            .check_lock_tokens(&path, &self.params.tokens, false)?;
        let handle = self.inner.apply_textdelta(file, base_checksum)?;
        self.record_change(&path, ChangeAction::Modify, None);
        Ok(handle)
    }

    fn push_window(&mut self, handle: &DeltaHandle, window: Option<DeltaWindow>) -> Result {
        self.inner.push_window(handle, window)
    }

    fn change_file_prop(
        &mut self,
        file: &FileBaton,
        name: &PropName,
        value: Option<&PropValue>,
    ) -> Result {
        let path = self.path_of(file.id().get())?;
        self.repo
            .check_lock_tokens(&path, &self.params.tokens, false)?;
        self.inner.change_file_prop(file, name, value)?;
        self.record_change(&path, ChangeAction::Modify, None);
        Ok(())
    }

    fn close_file(&mut self, file: FileBaton, text_checksum: Option<&Checksum>) -> Result {
        self.paths.remove(&file.id().get());
        self.inner.close_file(file, text_checksum)
    }

    fn close_edit(&mut self) -> Result {
        self.inner.close_edit()?;
        let tree = self
            .inner
            .take_tree()
            .ok_or_else(|| Error::new(ErrorCode::Storage, "finished edit yielded no tree"))?;
        let changed = std::mem::take(&mut self.changed);
        let revision = self
            .repo
            .finish_commit(self.base_rev, tree, &self.params, changed)?;
        self.committed = Some(revision);
        Ok(())
    }

    fn abort_edit(&mut self) -> Result {
        self.changed.clear();
        self.paths.clear();
        self.inner.abort_edit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rel(s: &str) -> RelPath {
        RelPath::new(s).unwrap()
    }

    fn fixture() -> MemoryRepo {
        let repo = MemoryRepo::new();
        repo.commit_files("alice", "initial import", &[("trunk/a.txt", "alpha")])
            .unwrap();
        repo.commit_files("bob", "add beta", &[("trunk/b.txt", "beta")])
            .unwrap();
        repo
    }

    mod reading {
        use super::*;

        #[test]
        fn revision_zero_is_empty() {
            let repo = MemoryRepo::new();
            assert_eq!(repo.head_revision().unwrap(), Revnum::ZERO);
            assert!(repo
                .list_directory(&RelPath::root(), Revnum::ZERO)
                .unwrap()
                .is_empty());
        }

        #[test]
        fn head_advances_per_commit() {
            let repo = fixture();
            assert_eq!(repo.head_revision().unwrap(), Revnum::new(2));
        }

        #[test]
        fn check_path_reports_kinds() {
            let repo = fixture();
            let head = repo.head_revision().unwrap();
            assert_eq!(repo.check_path(&rel("trunk"), head).unwrap(), NodeKind::Dir);
            assert_eq!(
                repo.check_path(&rel("trunk/a.txt"), head).unwrap(),
                NodeKind::File
            );
            assert_eq!(repo.check_path(&rel("ghost"), head).unwrap(), NodeKind::None);
        }

        #[test]
        fn stat_absent_is_ok_none() {
            let repo = fixture();
            let head = repo.head_revision().unwrap();
            assert!(repo.stat(&rel("ghost"), head).unwrap().is_none());
        }

        #[test]
        fn old_revisions_stay_visible() {
            let repo = fixture();
            assert_eq!(
                repo.check_path(&rel("trunk/b.txt"), Revnum::new(1)).unwrap(),
                NodeKind::None
            );
            assert_eq!(
                repo.check_path(&rel("trunk/b.txt"), Revnum::new(2)).unwrap(),
                NodeKind::File
            );
        }

        #[test]
        fn created_rev_prunes_unchanged_nodes() {
            let repo = fixture();
            let head = repo.head_revision().unwrap();
            // a.txt last changed in r1, b.txt in r2; trunk moved in r2.
            let a = repo.stat(&rel("trunk/a.txt"), head).unwrap().unwrap();
            let b = repo.stat(&rel("trunk/b.txt"), head).unwrap().unwrap();
            let trunk = repo.stat(&rel("trunk"), head).unwrap().unwrap();
            assert_eq!(a.created_rev, Revnum::new(1));
            assert_eq!(b.created_rev, Revnum::new(2));
            assert_eq!(trunk.created_rev, Revnum::new(2));
        }

        #[test]
        fn contents_stream_full_bytes() {
            let repo = fixture();
            let head = repo.head_revision().unwrap();
            let mut reader = repo.open_contents(&rel("trunk/a.txt"), head).unwrap();
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).unwrap();
            assert_eq!(buf, b"alpha");
        }

        #[test]
        fn revisions_for_path_ascending() {
            let repo = fixture();
            repo.commit_files("alice", "touch a", &[("trunk/a.txt", "alpha2")])
                .unwrap();
            let revs: Vec<u64> = repo
                .revisions_for_path(&rel("trunk/a.txt"))
                .unwrap()
                .iter()
                .map(|r| r.get())
                .collect();
            assert_eq!(revs, vec![1, 3]);
        }

        #[test]
        fn revision_info_metadata() {
            let repo = fixture();
            let info = repo.revision_info(Revnum::new(1)).unwrap().unwrap();
            assert_eq!(info.author.as_deref(), Some("alice"));
            assert_eq!(info.message.as_deref(), Some("initial import"));
            assert!(info.date.is_some());
            assert!(repo.revision_info(Revnum::new(99)).unwrap().is_none());
        }
    }

    mod dump {
        use super::*;

        #[test]
        fn json_roundtrip_preserves_history() {
            let repo = fixture();
            let json = repo.to_json().unwrap();
            let restored = MemoryRepo::from_json(&json).unwrap();
            assert_eq!(restored.head_revision().unwrap(), Revnum::new(2));
            assert_eq!(
                restored.tree_at(Revnum::new(2)).unwrap(),
                repo.tree_at(Revnum::new(2)).unwrap()
            );
            // Derived creation maps match the originals.
            let head = Revnum::new(2);
            assert_eq!(
                restored.stat(&rel("trunk/a.txt"), head).unwrap().unwrap().created_rev,
                Revnum::new(1)
            );
        }

        #[test]
        fn empty_dump_rejected() {
            assert!(MemoryRepo::from_json(r#"{"revisions": []}"#).is_err());
            assert!(MemoryRepo::from_json("not json").is_err());
        }

        #[test]
        fn save_and_load() {
            let repo = fixture();
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("repo.json");
            repo.save(&path).unwrap();
            let restored = MemoryRepo::load(&path).unwrap();
            assert_eq!(restored.head_revision().unwrap(), Revnum::new(2));
        }
    }

    mod locking {
        use super::*;

        fn params(owner: &str) -> LockParams {
            LockParams {
                owner: owner.to_string(),
                comment: None,
                expires_at: None,
            }
        }

        #[test]
        fn lock_then_get() {
            let repo = fixture();
            let lock = repo.lock(&rel("trunk/a.txt"), &params("alice")).unwrap();
            let found = repo.get_lock(&rel("trunk/a.txt")).unwrap().unwrap();
            assert_eq!(found.token, lock.token);
            assert_eq!(found.owner, "alice");
        }

        #[test]
        fn second_lock_conflicts() {
            let repo = fixture();
            repo.lock(&rel("trunk/a.txt"), &params("alice")).unwrap();
            let err = repo.lock(&rel("trunk/a.txt"), &params("bob")).unwrap_err();
            assert_eq!(err.code(), ErrorCode::LockConflict);
        }

        #[test]
        fn expired_lock_can_be_taken_over() {
            let repo = fixture();
            let expired = LockParams {
                owner: "alice".to_string(),
                comment: None,
                expires_at: Some(Utc::now() - Duration::hours(1)),
            };
            repo.lock(&rel("trunk/a.txt"), &expired).unwrap();
            repo.lock(&rel("trunk/a.txt"), &params("bob")).unwrap();
            let lock = repo.get_lock(&rel("trunk/a.txt")).unwrap().unwrap();
            assert_eq!(lock.owner, "bob");
        }

        #[test]
        fn unlock_requires_matching_token() {
            let repo = fixture();
            let lock = repo.lock(&rel("trunk/a.txt"), &params("alice")).unwrap();
            let stranger = LockToken::mint();
            assert_eq!(
                repo.unlock(&rel("trunk/a.txt"), Some(&stranger), false)
                    .unwrap_err()
                    .code(),
                ErrorCode::LockConflict
            );
            repo.unlock(&rel("trunk/a.txt"), Some(&lock.token), false)
                .unwrap();
            assert!(repo.get_lock(&rel("trunk/a.txt")).unwrap().is_none());
        }

        #[test]
        fn break_lock_ignores_token() {
            let repo = fixture();
            repo.lock(&rel("trunk/a.txt"), &params("alice")).unwrap();
            repo.unlock(&rel("trunk/a.txt"), None, true).unwrap();
            assert!(repo.get_lock(&rel("trunk/a.txt")).unwrap().is_none());
        }

        #[test]
        fn locking_a_directory_rejected() {
            let repo = fixture();
            let err = repo.lock(&rel("trunk"), &params("alice")).unwrap_err();
            assert_eq!(err.code(), ErrorCode::Validation);
        }
    }

    mod committing {
        use super::*;
        use crate::delta::window::DeltaWindow;

        #[test]
        fn commit_records_changed_paths() {
            let repo = fixture();
            repo.commit_files("carol", "rewrite a", &[("trunk/a.txt", "gamma")])
                .unwrap();
            let info = repo.revision_info(Revnum::new(3)).unwrap().unwrap();
            let paths = info.changed_paths.unwrap();
            assert_eq!(paths[&rel("trunk/a.txt")].action, ChangeAction::Modify);
        }

        #[test]
        fn locked_path_blocks_untokened_commit() {
            let repo = fixture();
            repo.lock(
                &rel("trunk/a.txt"),
                &LockParams {
                    owner: "alice".to_string(),
                    comment: None,
                    expires_at: None,
                },
            )
            .unwrap();
            let head = repo.head_revision().unwrap();
            let err = repo
                .commit_files("bob", "try", &[("trunk/a.txt", "nope")])
                .unwrap_err();
            assert!(err.chain().any(|e| e.code() == ErrorCode::LockConflict));
            // Nothing was applied.
            assert_eq!(repo.head_revision().unwrap(), head);
        }

        #[test]
        fn valid_token_admits_commit() {
            let repo = fixture();
            let lock = repo
                .lock(
                    &rel("trunk/a.txt"),
                    &LockParams {
                        owner: "alice".to_string(),
                        comment: None,
                        expires_at: None,
                    },
                )
                .unwrap();
            let base = repo.head_revision().unwrap();
            let mut target = repo.tree_at(base).unwrap();
            target
                .put(&rel("trunk/a.txt"), TreeNode::file(&b"tokened"[..]))
                .unwrap();
            let mut editor = repo
                .begin_commit(CommitParams {
                    author: Some("alice".into()),
                    message: Some("with token".into()),
                    tokens: vec![lock.token],
                })
                .unwrap();
            crate::session::Session::new(&repo)
                .commit(base, &target, &mut editor)
                .unwrap();
            assert_eq!(editor.committed_revision(), Some(Revnum::new(3)));
        }

        #[test]
        fn expired_token_is_a_conflict_before_mutation() {
            let repo = fixture();
            let lock = repo
                .lock(
                    &rel("trunk/a.txt"),
                    &LockParams {
                        owner: "alice".to_string(),
                        comment: None,
                        expires_at: Some(Utc::now() - Duration::minutes(5)),
                    },
                )
                .unwrap();
            let base = repo.head_revision().unwrap();
            let mut editor = repo
                .begin_commit(CommitParams {
                    author: Some("alice".into()),
                    message: Some("too late".into()),
                    tokens: vec![lock.token],
                })
                .unwrap();
            let root = editor.open_root(Some(base)).unwrap();
            let trunk = editor.open_directory(&root, &rel("trunk"), Some(base)).unwrap();
            let err = editor
                .open_file(&trunk, &rel("trunk/a.txt"), Some(base))
                .and_then(|f| {
                    editor.apply_textdelta(&f, None).map(|h| (f, h))
                })
                .and_then(|(_f, h)| {
                    editor.push_window(&h, Some(DeltaWindow::insert(b"x".to_vec())))
                })
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::LockConflict);
            editor.abort_edit().unwrap();
            assert_eq!(repo.head_revision().unwrap(), base);
        }

        #[test]
        fn stale_base_rejected() {
            let repo = fixture();
            let base = repo.head_revision().unwrap();
            let mut target = repo.tree_at(base).unwrap();
            target
                .put(&rel("trunk/a.txt"), TreeNode::file(&b"mine"[..]))
                .unwrap();
            let mut editor = repo.begin_commit(CommitParams::default()).unwrap();
            // Someone else commits first.
            repo.commit_files("eve", "race winner", &[("trunk/a.txt", "hers")])
                .unwrap();
            let err = crate::session::Session::new(&repo)
                .commit(base, &target, &mut editor)
                .unwrap_err();
            assert!(err.chain().any(|e| e.code() == ErrorCode::Storage));
        }
    }
}
