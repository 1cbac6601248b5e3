//! session::driver
//!
//! The checkout, update, and commit drives.
//!
//! Each drive walks a pair of tree views and emits one grammatically valid
//! edit: parents open before children, deletes precede re-adds of the same
//! name, children close before their parents, and file content goes out as
//! chunked windows so memory stays bounded regardless of file size.
//! Storage listings arrive in whatever order the oracle keeps them; the
//! drive buffers and reorders them into the grammar.

use std::collections::BTreeMap;
use std::io::Read;

use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorCode, Result};
use crate::core::types::{
    Checksum, NodeKind, PropName, PropValue, RelPath, RevisionSpec, Revnum,
};
use crate::delta::editor::{DirBaton, Editor};
use crate::delta::tree::{Tree, TreeNode};
use crate::delta::window::{build_windows, DeltaWindow};

use super::{run_edit, Session};

type PropMap = BTreeMap<PropName, PropValue>;

impl Session<'_> {
    /// Drive a full checkout of `revision` (head when `None`) into
    /// `editor`. Returns the pinned revision.
    pub fn checkout<E: Editor>(&self, revision: Option<Revnum>, editor: &mut E) -> Result<Revnum> {
        let revision = self.resolve_revision(revision.into())?;
        run_edit(editor, |ed| {
            let root = ed.open_root(None)?;
            self.populate_dir(revision, &RelPath::root(), &root, ed)?;
            ed.close_directory(root)
        })?;
        Ok(revision)
    }

    /// Drive the difference between two revisions into `editor`. Returns
    /// the target revision.
    ///
    /// Subtrees whose `created_rev` is not newer than `from` are skipped
    /// without being walked.
    pub fn update<E: Editor>(
        &self,
        from: Revnum,
        to: Option<Revnum>,
        editor: &mut E,
    ) -> Result<Revnum> {
        let to = self.resolve_revision(to.into())?;
        self.resolve_revision(RevisionSpec::Number(from))?;
        run_edit(editor, |ed| {
            let root = ed.open_root(Some(from))?;
            self.update_dir(from, to, &RelPath::root(), &root, ed)?;
            ed.close_directory(root)
        })?;
        Ok(to)
    }

    /// Drive the difference between revision `base` and a caller-supplied
    /// target tree into `editor`. The usual editor here is a commit
    /// editor; the target tree is the state the caller wants committed.
    pub fn commit<E: Editor>(&self, base: Revnum, target: &Tree, editor: &mut E) -> Result {
        self.resolve_revision(RevisionSpec::Number(base))?;
        run_edit(editor, |ed| {
            let root = ed.open_root(Some(base))?;
            self.commit_dir(base, target.root(), &RelPath::root(), &root, ed)?;
            ed.close_directory(root)
        })
    }

    /// Emit the full content of a directory at `revision` as adds.
    fn populate_dir<E: Editor>(
        &self,
        revision: Revnum,
        path: &RelPath,
        baton: &DirBaton,
        ed: &mut E,
    ) -> Result {
        self.cancel().check()?;
        for (name, value) in self.storage().node_props(path, revision)? {
            ed.change_dir_prop(baton, &name, Some(&value))?;
        }
        for (name, entry) in self.storage().list_directory(path, revision)? {
            self.cancel().check()?;
            let child = path.join(&name)?;
            match entry.kind {
                NodeKind::Dir => {
                    let sub = ed.add_directory(baton, &child, None)?;
                    self.populate_dir(revision, &child, &sub, ed)?;
                    ed.close_directory(sub)?;
                }
                NodeKind::File => {
                    let file = ed.add_file(baton, &child, None)?;
                    for (pname, value) in self.storage().node_props(&child, revision)? {
                        ed.change_file_prop(&file, &pname, Some(&value))?;
                    }
                    let checksum = self.stream_contents(revision, &child, &file, ed)?;
                    ed.close_file(file, Some(&checksum))?;
                }
                NodeKind::None | NodeKind::Unknown => {
                    return Err(Error::new(
                        ErrorCode::Storage,
                        format!("listing of '{}' reported unusable kind for '{}'", path, name),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Stream a file's content into an installed textdelta as pure-insert
    /// windows, returning the content checksum.
    fn stream_contents<E: Editor>(
        &self,
        revision: Revnum,
        path: &RelPath,
        file: &crate::delta::editor::FileBaton,
        ed: &mut E,
    ) -> Result<Checksum> {
        let handle = ed.apply_textdelta(file, None)?;
        let mut reader = self.storage().open_contents(path, revision)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size()];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            ed.push_window(&handle, Some(DeltaWindow::insert(buf[..n].to_vec())))?;
        }
        ed.push_window(&handle, None)?;
        Ok(Checksum::parse(hex::encode(hasher.finalize()))?)
    }

    fn update_dir<E: Editor>(
        &self,
        from: Revnum,
        to: Revnum,
        path: &RelPath,
        baton: &DirBaton,
        ed: &mut E,
    ) -> Result {
        self.cancel().check()?;
        let old_props = self.storage().node_props(path, from)?;
        let new_props = self.storage().node_props(path, to)?;
        diff_props(&old_props, &new_props, |name, value| {
            ed.change_dir_prop(baton, name, value)
        })?;

        let old = self.storage().list_directory(path, from)?;
        let new = self.storage().list_directory(path, to)?;

        // Deletes first, so a kind change or re-add reads as a replace.
        for (name, old_entry) in &old {
            let survives = new
                .get(name)
                .map(|n| n.kind == old_entry.kind)
                .unwrap_or(false);
            if !survives {
                let child = path.join(name)?;
                ed.delete_entry(baton, &child, Some(from))?;
            }
        }

        for (name, entry) in &new {
            self.cancel().check()?;
            let child = path.join(name)?;
            let carried = old.get(name).filter(|o| o.kind == entry.kind);
            match (entry.kind, carried) {
                (NodeKind::Dir, Some(_)) => {
                    if entry.created_rev > from {
                        let sub = ed.open_directory(baton, &child, Some(from))?;
                        self.update_dir(from, to, &child, &sub, ed)?;
                        ed.close_directory(sub)?;
                    }
                }
                (NodeKind::Dir, None) => {
                    let sub = ed.add_directory(baton, &child, None)?;
                    self.populate_dir(to, &child, &sub, ed)?;
                    ed.close_directory(sub)?;
                }
                (NodeKind::File, Some(_)) => {
                    if entry.created_rev > from {
                        self.update_file(from, to, &child, baton, ed)?;
                    }
                }
                (NodeKind::File, None) => {
                    let file = ed.add_file(baton, &child, None)?;
                    for (pname, value) in self.storage().node_props(&child, to)? {
                        ed.change_file_prop(&file, &pname, Some(&value))?;
                    }
                    let checksum = self.stream_contents(to, &child, &file, ed)?;
                    ed.close_file(file, Some(&checksum))?;
                }
                (NodeKind::None | NodeKind::Unknown, _) => {
                    return Err(Error::new(
                        ErrorCode::Storage,
                        format!("listing of '{}' reported unusable kind for '{}'", path, name),
                    ))
                }
            }
        }
        Ok(())
    }

    fn update_file<E: Editor>(
        &self,
        from: Revnum,
        to: Revnum,
        path: &RelPath,
        baton: &DirBaton,
        ed: &mut E,
    ) -> Result {
        let old_content = self.read_all(path, from)?;
        let new_content = self.read_all(path, to)?;
        let old_props = self.storage().node_props(path, from)?;
        let new_props = self.storage().node_props(path, to)?;
        if old_content == new_content && old_props == new_props {
            return Ok(());
        }

        let file = ed.open_file(baton, path, Some(from))?;
        diff_props(&old_props, &new_props, |name, value| {
            ed.change_file_prop(&file, name, value)
        })?;
        let mut text_checksum = None;
        if old_content != new_content {
            let handle = ed.apply_textdelta(&file, Some(&Checksum::of(&old_content)))?;
            for window in build_windows(&old_content, &new_content, self.chunk_size()) {
                ed.push_window(&handle, Some(window))?;
            }
            ed.push_window(&handle, None)?;
            text_checksum = Some(Checksum::of(&new_content));
        }
        ed.close_file(file, text_checksum.as_ref())
    }

    fn commit_dir<E: Editor>(
        &self,
        base: Revnum,
        node: &TreeNode,
        path: &RelPath,
        baton: &DirBaton,
        ed: &mut E,
    ) -> Result {
        self.cancel().check()?;
        let target_entries = node.entries().ok_or_else(|| {
            Error::new(
                ErrorCode::Validation,
                format!("target node at '{}' is not a directory", path),
            )
        })?;
        let old_props = self.storage().node_props(path, base)?;
        diff_props(&old_props, node.props(), |name, value| {
            ed.change_dir_prop(baton, name, value)
        })?;

        let old = self.storage().list_directory(path, base)?;

        for (name, old_entry) in &old {
            let survives = target_entries
                .get(name)
                .map(|n| n.kind() == old_entry.kind)
                .unwrap_or(false);
            if !survives {
                let child = path.join(name)?;
                ed.delete_entry(baton, &child, Some(base))?;
            }
        }

        for (name, target) in target_entries {
            self.cancel().check()?;
            let child = path.join(name)?;
            let carried = old.get(name).filter(|o| o.kind == target.kind());
            match (target, carried) {
                (TreeNode::Dir { .. }, Some(_)) => {
                    let sub = ed.open_directory(baton, &child, Some(base))?;
                    self.commit_dir(base, target, &child, &sub, ed)?;
                    ed.close_directory(sub)?;
                }
                (TreeNode::Dir { .. }, None) => {
                    let sub = ed.add_directory(baton, &child, None)?;
                    populate_from_node(target, &child, &sub, self.chunk_size(), ed)?;
                    ed.close_directory(sub)?;
                }
                (TreeNode::File { content, props }, Some(_)) => {
                    self.commit_file(base, &child, content, props, baton, ed)?;
                }
                (TreeNode::File { content, props }, None) => {
                    let file = ed.add_file(baton, &child, None)?;
                    for (pname, value) in props {
                        ed.change_file_prop(&file, pname, Some(value))?;
                    }
                    send_full_content(content, &file, self.chunk_size(), ed)?;
                    ed.close_file(file, Some(&Checksum::of(content)))?;
                }
            }
        }
        Ok(())
    }

    fn commit_file<E: Editor>(
        &self,
        base: Revnum,
        path: &RelPath,
        new_content: &[u8],
        new_props: &PropMap,
        baton: &DirBaton,
        ed: &mut E,
    ) -> Result {
        let old_content = self.read_all(path, base)?;
        let old_props = self.storage().node_props(path, base)?;
        if old_content == new_content && old_props == *new_props {
            return Ok(());
        }
        let file = ed.open_file(baton, path, Some(base))?;
        diff_props(&old_props, new_props, |name, value| {
            ed.change_file_prop(&file, name, value)
        })?;
        let mut text_checksum = None;
        if old_content != new_content {
            let handle = ed.apply_textdelta(&file, Some(&Checksum::of(&old_content)))?;
            for window in build_windows(&old_content, new_content, self.chunk_size()) {
                ed.push_window(&handle, Some(window))?;
            }
            ed.push_window(&handle, None)?;
            text_checksum = Some(Checksum::of(new_content));
        }
        ed.close_file(file, text_checksum.as_ref())
    }

    fn read_all(&self, path: &RelPath, revision: Revnum) -> Result<Vec<u8>> {
        let mut reader = self.storage().open_contents(path, revision)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Emit property changes turning `old` into `new`.
fn diff_props(
    old: &PropMap,
    new: &PropMap,
    mut apply: impl FnMut(&PropName, Option<&PropValue>) -> Result,
) -> Result {
    for name in old.keys() {
        if !new.contains_key(name) {
            apply(name, None)?;
        }
    }
    for (name, value) in new {
        if old.get(name) != Some(value) {
            apply(name, Some(value))?;
        }
    }
    Ok(())
}

/// Emit a whole target subtree as adds.
fn populate_from_node<E: Editor>(
    node: &TreeNode,
    path: &RelPath,
    baton: &DirBaton,
    chunk_size: usize,
    ed: &mut E,
) -> Result {
    for (name, value) in node.props() {
        ed.change_dir_prop(baton, name, Some(value))?;
    }
    let entries = node.entries().ok_or_else(|| {
        Error::new(
            ErrorCode::Validation,
            format!("target node at '{}' is not a directory", path),
        )
    })?;
    for (name, child) in entries {
        let child_path = path.join(name)?;
        match child {
            TreeNode::Dir { .. } => {
                let sub = ed.add_directory(baton, &child_path, None)?;
                populate_from_node(child, &child_path, &sub, chunk_size, ed)?;
                ed.close_directory(sub)?;
            }
            TreeNode::File { content, props } => {
                let file = ed.add_file(baton, &child_path, None)?;
                for (pname, value) in props {
                    ed.change_file_prop(&file, pname, Some(value))?;
                }
                send_full_content(content, &file, chunk_size, ed)?;
                ed.close_file(file, Some(&Checksum::of(content)))?;
            }
        }
    }
    Ok(())
}

fn send_full_content<E: Editor>(
    content: &[u8],
    file: &crate::delta::editor::FileBaton,
    chunk_size: usize,
    ed: &mut E,
) -> Result {
    let handle = ed.apply_textdelta(file, None)?;
    for chunk in content.chunks(chunk_size.max(1)) {
        ed.push_window(&handle, Some(DeltaWindow::insert(chunk.to_vec())))?;
    }
    ed.push_window(&handle, None)
}
