//! delta::tree
//!
//! In-memory tree model and the reference editor that builds one.
//!
//! # Overview
//!
//! [`Tree`] is a nested directory/file structure with per-node properties
//! and file content. [`TreeEditor`] implements [`Editor`] by applying an
//! edit against a base tree and yielding the resulting tree after a
//! successful `close_edit`; `abort_edit` discards all partial state.
//!
//! `TreeEditor` is the reference editor: the session drivers are tested
//! against it, the commit path diffs against it, and the CLI's `ls` output
//! comes from trees. It checks structural contract points (add over an
//! existing entry, open of a missing entry, checksum mismatches) and leaves
//! full grammar enforcement to
//! [`ValidatingEditor`](crate::delta::validate::ValidatingEditor).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorCode, Result};
use crate::core::types::{Checksum, CopySource, NodeKind, PropName, PropValue, RelPath, Revnum};
use crate::delta::editor::{BatonId, DeltaHandle, DirBaton, Editor, FileBaton};
use crate::delta::window::{apply_window, DeltaWindow};

/// Property map attached to a node.
pub type PropMap = BTreeMap<PropName, PropValue>;

/// One node of an in-memory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TreeNode {
    /// A directory with named children.
    Dir {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        props: PropMap,
        #[serde(default)]
        entries: BTreeMap<String, TreeNode>,
    },
    /// A file with content bytes.
    File {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        props: PropMap,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        content: Vec<u8>,
    },
}

impl TreeNode {
    /// An empty directory.
    pub fn dir() -> Self {
        TreeNode::Dir {
            props: PropMap::new(),
            entries: BTreeMap::new(),
        }
    }

    /// A file with the given content.
    pub fn file(content: impl Into<Vec<u8>>) -> Self {
        TreeNode::File {
            props: PropMap::new(),
            content: content.into(),
        }
    }

    /// The node's kind.
    pub fn kind(&self) -> NodeKind {
        match self {
            TreeNode::Dir { .. } => NodeKind::Dir,
            TreeNode::File { .. } => NodeKind::File,
        }
    }

    /// The node's properties.
    pub fn props(&self) -> &PropMap {
        match self {
            TreeNode::Dir { props, .. } | TreeNode::File { props, .. } => props,
        }
    }

    fn props_mut(&mut self) -> &mut PropMap {
        match self {
            TreeNode::Dir { props, .. } | TreeNode::File { props, .. } => props,
        }
    }

    /// File content, or `None` for directories.
    pub fn content(&self) -> Option<&[u8]> {
        match self {
            TreeNode::File { content, .. } => Some(content),
            TreeNode::Dir { .. } => None,
        }
    }

    /// Directory entries, or `None` for files.
    pub fn entries(&self) -> Option<&BTreeMap<String, TreeNode>> {
        match self {
            TreeNode::Dir { entries, .. } => Some(entries),
            TreeNode::File { .. } => None,
        }
    }
}

/// A whole in-memory tree. The root is always a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    root: TreeNode,
}

impl Default for Tree {
    fn default() -> Self {
        Self::empty()
    }
}

impl Tree {
    /// The empty tree.
    pub fn empty() -> Self {
        Self {
            root: TreeNode::dir(),
        }
    }

    /// Build a tree around an existing root directory node.
    pub fn from_root(root: TreeNode) -> Result<Self> {
        if root.kind() != NodeKind::Dir {
            return Err(Error::new(
                ErrorCode::Validation,
                "tree root must be a directory",
            ));
        }
        Ok(Self { root })
    }

    /// The root directory node.
    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Look up the node at `path`.
    pub fn get(&self, path: &RelPath) -> Option<&TreeNode> {
        let mut cur = &self.root;
        for component in path.components() {
            cur = cur.entries()?.get(component)?;
        }
        Some(cur)
    }

    fn get_mut(&mut self, path: &RelPath) -> Option<&mut TreeNode> {
        let mut cur = &mut self.root;
        for component in path.components() {
            cur = match cur {
                TreeNode::Dir { entries, .. } => entries.get_mut(component)?,
                TreeNode::File { .. } => return None,
            };
        }
        Some(cur)
    }

    /// The kind of the node at `path` (`NodeKind::None` when absent).
    pub fn kind(&self, path: &RelPath) -> NodeKind {
        self.get(path).map_or(NodeKind::None, TreeNode::kind)
    }

    /// File content at `path`, if it names a file.
    pub fn file_content(&self, path: &RelPath) -> Option<&[u8]> {
        self.get(path).and_then(TreeNode::content)
    }

    /// Insert `node` at `path`. The parent must be an existing directory
    /// and the entry must not already exist.
    pub fn insert(&mut self, path: &RelPath, node: TreeNode) -> Result {
        let parent_path = path.parent().ok_or_else(|| {
            Error::new(ErrorCode::Validation, "cannot insert over the tree root")
        })?;
        let name = path.name().to_string();
        let parent = self.dir_entries_mut(&parent_path)?;
        if parent.contains_key(&name) {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("entry '{}' already exists", path),
            ));
        }
        parent.insert(name, node);
        Ok(())
    }

    /// Replace or create the node at `path`, parent must exist.
    pub fn put(&mut self, path: &RelPath, node: TreeNode) -> Result {
        let parent_path = path.parent().ok_or_else(|| {
            Error::new(ErrorCode::Validation, "cannot replace the tree root")
        })?;
        let name = path.name().to_string();
        self.dir_entries_mut(&parent_path)?.insert(name, node);
        Ok(())
    }

    /// Remove the entry at `path`.
    pub fn remove(&mut self, path: &RelPath) -> Result<TreeNode> {
        let parent_path = path
            .parent()
            .ok_or_else(|| Error::new(ErrorCode::Validation, "cannot remove the tree root"))?;
        let name = path.name().to_string();
        self.dir_entries_mut(&parent_path)?
            .remove(&name)
            .ok_or_else(|| {
                Error::new(
                    ErrorCode::ProtocolViolation,
                    format!("no entry '{}' to delete", path),
                )
            })
    }

    fn dir_entries_mut(&mut self, path: &RelPath) -> Result<&mut BTreeMap<String, TreeNode>> {
        match self.get_mut(path) {
            Some(TreeNode::Dir { entries, .. }) => Ok(entries),
            Some(TreeNode::File { .. }) => Err(Error::new(
                ErrorCode::Validation,
                format!("'{}' is a file, not a directory", path),
            )),
            None => Err(Error::new(
                ErrorCode::Validation,
                format!("no such directory '{}'", path),
            )),
        }
    }

    /// All file paths in the tree, depth-first, sorted.
    pub fn file_paths(&self) -> Vec<RelPath> {
        let mut out = Vec::new();
        collect_files(&self.root, &RelPath::root(), &mut out);
        out
    }
}

fn collect_files(node: &TreeNode, at: &RelPath, out: &mut Vec<RelPath>) {
    if let Some(entries) = node.entries() {
        for (name, child) in entries {
            // Entry names came in through RelPath validation.
            let child_path = at.join(name).expect("tree entry names are valid");
            match child {
                TreeNode::File { .. } => out.push(child_path),
                TreeNode::Dir { .. } => collect_files(child, &child_path, out),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditState {
    NotStarted,
    Active,
    Finished,
    Aborted,
}

#[derive(Debug)]
struct OpenNode {
    path: RelPath,
}

#[derive(Debug)]
struct DeltaState {
    file: BatonId,
    path: RelPath,
    baseline: Vec<u8>,
    out: Vec<u8>,
}

/// An [`Editor`] that applies an edit to an in-memory base tree.
///
/// # Example
///
/// ```
/// use treewire::delta::tree::{Tree, TreeEditor};
/// use treewire::delta::editor::Editor;
/// use treewire::delta::window::DeltaWindow;
/// use treewire::core::types::RelPath;
///
/// let mut editor = TreeEditor::new(Tree::empty());
/// let root = editor.open_root(None).unwrap();
/// let file = editor
///     .add_file(&root, &RelPath::new("a.txt").unwrap(), None)
///     .unwrap();
/// let delta = editor.apply_textdelta(&file, None).unwrap();
/// editor.push_window(&delta, Some(DeltaWindow::insert(b"hello".to_vec()))).unwrap();
/// editor.push_window(&delta, None).unwrap();
/// editor.close_file(file, None).unwrap();
/// editor.close_directory(root).unwrap();
/// editor.close_edit().unwrap();
///
/// let tree = editor.take_tree().unwrap();
/// assert_eq!(tree.file_content(&RelPath::new("a.txt").unwrap()), Some(&b"hello"[..]));
/// ```
#[derive(Debug)]
pub struct TreeEditor {
    base: Tree,
    work: Option<Tree>,
    state: EditState,
    open: HashMap<u64, OpenNode>,
    deltas: HashMap<u64, DeltaState>,
    next_id: u64,
}

impl TreeEditor {
    /// Create an editor over a base tree.
    pub fn new(base: Tree) -> Self {
        Self {
            base,
            work: None,
            state: EditState::NotStarted,
            open: HashMap::new(),
            deltas: HashMap::new(),
            next_id: 0,
        }
    }

    /// Take the finished tree. `None` unless the edit closed successfully.
    pub fn take_tree(&mut self) -> Option<Tree> {
        if self.state == EditState::Finished {
            self.work.take()
        } else {
            None
        }
    }

    fn mint(&mut self, path: RelPath) -> BatonId {
        let id = BatonId::new(self.next_id);
        self.next_id += 1;
        self.open.insert(id.get(), OpenNode { path });
        id
    }

    fn require_active(&self) -> Result {
        match self.state {
            EditState::Active => Ok(()),
            EditState::NotStarted => Err(Error::new(
                ErrorCode::ProtocolViolation,
                "edit has not been opened",
            )),
            EditState::Finished | EditState::Aborted => Err(Error::new(
                ErrorCode::ProtocolViolation,
                "edit is already finished",
            )),
        }
    }

    fn node_path(&self, id: BatonId) -> Result<RelPath> {
        self.open
            .get(&id.get())
            .map(|n| n.path.clone())
            .ok_or_else(|| Error::new(ErrorCode::ProtocolViolation, "unknown or closed baton"))
    }

    fn work_mut(&mut self) -> &mut Tree {
        self.work.as_mut().expect("active edit has a work tree")
    }

    /// Resolve the baseline text for a textdelta on `path`.
    ///
    /// Opened files delta against the base tree; added files against the
    /// empty baseline (or their copy source, already materialized into the
    /// work tree at add time).
    fn baseline_for(&self, path: &RelPath) -> Vec<u8> {
        if let Some(work) = &self.work {
            if let Some(content) = work.file_content(path) {
                return content.to_vec();
            }
        }
        self.base
            .file_content(path)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    fn copy_node(&self, source: &CopySource, want: NodeKind) -> Result<TreeNode> {
        let node = self.base.get(&source.path).ok_or_else(|| {
            Error::new(
                ErrorCode::Validation,
                format!("copy source '{}' does not exist", source.path),
            )
        })?;
        if node.kind() != want {
            return Err(Error::new(
                ErrorCode::Validation,
                format!(
                    "copy source '{}' is a {}, expected {}",
                    source.path,
                    node.kind(),
                    want
                ),
            ));
        }
        Ok(node.clone())
    }
}

impl Editor for TreeEditor {
    fn open_root(&mut self, _base_revision: Option<Revnum>) -> Result<DirBaton> {
        if self.state != EditState::NotStarted {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                "open_root called twice",
            ));
        }
        self.state = EditState::Active;
        self.work = Some(self.base.clone());
        Ok(DirBaton::new(self.mint(RelPath::root())))
    }

    fn delete_entry(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        _revision: Option<Revnum>,
    ) -> Result {
        self.require_active()?;
        self.node_path(dir.id())?;
        self.work_mut().remove(path)?;
        Ok(())
    }

    fn add_directory(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        copy_from: Option<&CopySource>,
    ) -> Result<DirBaton> {
        self.require_active()?;
        self.node_path(dir.id())?;
        let node = match copy_from {
            Some(source) => self.copy_node(source, NodeKind::Dir)?,
            None => TreeNode::dir(),
        };
        self.work_mut().insert(path, node)?;
        Ok(DirBaton::new(self.mint(path.clone())))
    }

    fn open_directory(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        _base_revision: Option<Revnum>,
    ) -> Result<DirBaton> {
        self.require_active()?;
        self.node_path(dir.id())?;
        match self.work_mut().kind(path) {
            NodeKind::Dir => Ok(DirBaton::new(self.mint(path.clone()))),
            NodeKind::None => Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("open_directory of nonexistent '{}'", path),
            )),
            other => Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("open_directory of {} '{}'", other, path),
            )),
        }
    }

    fn change_dir_prop(
        &mut self,
        dir: &DirBaton,
        name: &PropName,
        value: Option<&PropValue>,
    ) -> Result {
        self.require_active()?;
        let path = self.node_path(dir.id())?;
        let node = self
            .work_mut()
            .get_mut(&path)
            .expect("open directory exists in work tree");
        match value {
            Some(v) => {
                node.props_mut().insert(name.clone(), v.clone());
            }
            None => {
                node.props_mut().remove(name);
            }
        }
        Ok(())
    }

    fn close_directory(&mut self, dir: DirBaton) -> Result {
        self.require_active()?;
        self.node_path(dir.id())?;
        self.open.remove(&dir.id().get());
        Ok(())
    }

    fn add_file(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        copy_from: Option<&CopySource>,
    ) -> Result<FileBaton> {
        self.require_active()?;
        self.node_path(dir.id())?;
        let node = match copy_from {
            Some(source) => self.copy_node(source, NodeKind::File)?,
            None => TreeNode::file(Vec::new()),
        };
        self.work_mut().insert(path, node)?;
        Ok(FileBaton::new(self.mint(path.clone())))
    }

    fn open_file(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        _base_revision: Option<Revnum>,
    ) -> Result<FileBaton> {
        self.require_active()?;
        self.node_path(dir.id())?;
        match self.work_mut().kind(path) {
            NodeKind::File => Ok(FileBaton::new(self.mint(path.clone()))),
            NodeKind::None => Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("open_file of nonexistent '{}'", path),
            )),
            other => Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("open_file of {} '{}'", other, path),
            )),
        }
    }

    fn apply_textdelta(
        &mut self,
        file: &FileBaton,
        base_checksum: Option<&Checksum>,
    ) -> Result<DeltaHandle> {
        self.require_active()?;
        let path = self.node_path(file.id())?;
        if self.deltas.values().any(|d| d.file == file.id()) {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("textdelta already applied to '{}'", path),
            ));
        }
        let baseline = self.baseline_for(&path);
        if let Some(expected) = base_checksum {
            let actual = Checksum::of(&baseline);
            if &actual != expected {
                return Err(Error::new(
                    ErrorCode::Validation,
                    format!(
                        "base checksum mismatch on '{}': expected {}, have {}",
                        path, expected, actual
                    ),
                ));
            }
        }
        let id = self.mint(path.clone());
        self.deltas.insert(
            id.get(),
            DeltaState {
                file: file.id(),
                path,
                baseline,
                out: Vec::new(),
            },
        );
        Ok(DeltaHandle::new(id))
    }

    fn push_window(&mut self, handle: &DeltaHandle, window: Option<DeltaWindow>) -> Result {
        self.require_active()?;
        match window {
            Some(w) => {
                let delta = self.deltas.get_mut(&handle.id().get()).ok_or_else(|| {
                    Error::new(ErrorCode::ProtocolViolation, "unknown or retired delta handle")
                })?;
                apply_window(&delta.baseline, &w, &mut delta.out)
            }
            None => {
                let delta = self.deltas.remove(&handle.id().get()).ok_or_else(|| {
                    Error::new(ErrorCode::ProtocolViolation, "unknown or retired delta handle")
                })?;
                self.open.remove(&handle.id().get());
                let path = delta.path;
                let node = self
                    .work_mut()
                    .get_mut(&path)
                    .expect("delta target exists in work tree");
                match node {
                    TreeNode::File { content, .. } => {
                        *content = delta.out;
                        Ok(())
                    }
                    TreeNode::Dir { .. } => Err(Error::new(
                        ErrorCode::ProtocolViolation,
                        format!("textdelta target '{}' is a directory", path),
                    )),
                }
            }
        }
    }

    fn change_file_prop(
        &mut self,
        file: &FileBaton,
        name: &PropName,
        value: Option<&PropValue>,
    ) -> Result {
        self.require_active()?;
        let path = self.node_path(file.id())?;
        let node = self
            .work_mut()
            .get_mut(&path)
            .expect("open file exists in work tree");
        match value {
            Some(v) => {
                node.props_mut().insert(name.clone(), v.clone());
            }
            None => {
                node.props_mut().remove(name);
            }
        }
        Ok(())
    }

    fn close_file(&mut self, file: FileBaton, text_checksum: Option<&Checksum>) -> Result {
        self.require_active()?;
        let path = self.node_path(file.id())?;
        if self.deltas.values().any(|d| d.file == file.id()) {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("close_file on '{}' with unterminated textdelta", path),
            ));
        }
        if let Some(expected) = text_checksum {
            let content = self
                .work
                .as_ref()
                .and_then(|w| w.file_content(&path))
                .unwrap_or_default();
            let actual = Checksum::of(content);
            if &actual != expected {
                return Err(Error::new(
                    ErrorCode::Validation,
                    format!(
                        "text checksum mismatch on '{}': expected {}, have {}",
                        path, expected, actual
                    ),
                ));
            }
        }
        self.open.remove(&file.id().get());
        Ok(())
    }

    fn close_edit(&mut self) -> Result {
        self.require_active()?;
        if !self.open.is_empty() {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("close_edit with {} baton(s) still open", self.open.len()),
            ));
        }
        self.state = EditState::Finished;
        Ok(())
    }

    fn abort_edit(&mut self) -> Result {
        if matches!(self.state, EditState::Finished | EditState::Aborted) {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                "abort_edit after the edit finished",
            ));
        }
        self.state = EditState::Aborted;
        self.work = None;
        self.open.clear();
        self.deltas.clear();
        Ok(())
    }
}
