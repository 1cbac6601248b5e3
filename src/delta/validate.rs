//! delta::validate
//!
//! Runtime enforcement of the editor call grammar.
//!
//! # Overview
//!
//! [`ValidatingEditor`] wraps any [`Editor`] and checks every call against
//! the protocol grammar before forwarding it. The baton type system already
//! rules out whole classes of misuse at compile time (a consumed baton
//! cannot be reused, a file baton cannot open a directory); this wrapper
//! catches the ordering mistakes types cannot see:
//!
//! - `open_root` must come exactly once, before anything else
//! - a child path must nest directly under its parent baton's path
//! - per name within one directory pass: delete-then-add is a replace,
//!   while add-then-delete, double delete, and open-after-delete are
//!   violations
//! - a node closes only after all children opened under it have closed
//! - at most one textdelta per file, terminated before `close_file`
//! - `close_edit` requires every baton closed; nothing follows the edit's
//!   end, and `abort_edit` is valid only before it
//!
//! A violation is reported as a `ProtocolViolation` error and the inner
//! editor is not invoked for the offending call. Wrap the real editor when
//! driving it with hand-written or untrusted call sequences; the bundled
//! drivers emit valid grammar by construction.

use std::collections::HashMap;

use crate::core::error::{Error, ErrorCode, Result};
use crate::core::types::{Checksum, CopySource, PropName, PropValue, RelPath, Revnum};
use crate::delta::editor::{BatonId, DeltaHandle, DirBaton, Editor, FileBaton};
use crate::delta::window::DeltaWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditState {
    NotStarted,
    Active,
    Finished,
    Aborted,
}

/// What already happened to a name within its parent directory's pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameFate {
    Deleted,
    Added,
    Opened,
}

#[derive(Debug)]
struct DirState {
    inner: DirBaton,
    path: RelPath,
    parent: Option<u64>,
    open_children: usize,
    names: HashMap<String, NameFate>,
}

#[derive(Debug)]
struct FileState {
    inner: FileBaton,
    path: RelPath,
    parent: u64,
    delta_installed: bool,
    delta_live: bool,
}

#[derive(Debug)]
struct HandleState {
    inner: DeltaHandle,
    file: u64,
}

fn violation(message: impl Into<String>) -> Error {
    Error::new(ErrorCode::ProtocolViolation, message)
}

/// An [`Editor`] decorator that rejects grammar violations before they
/// reach the wrapped editor.
#[derive(Debug)]
pub struct ValidatingEditor<E> {
    inner: E,
    state: EditState,
    dirs: HashMap<u64, DirState>,
    files: HashMap<u64, FileState>,
    handles: HashMap<u64, HandleState>,
    next_id: u64,
}

impl<E: Editor> ValidatingEditor<E> {
    /// Wrap an editor.
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            state: EditState::NotStarted,
            dirs: HashMap::new(),
            files: HashMap::new(),
            handles: HashMap::new(),
            next_id: 0,
        }
    }

    /// Unwrap the inner editor.
    pub fn into_inner(self) -> E {
        self.inner
    }

    /// Access the inner editor.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Mutable access to the inner editor.
    pub fn inner_mut(&mut self) -> &mut E {
        &mut self.inner
    }

    fn mint(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn require_active(&self) -> Result {
        match self.state {
            EditState::Active => Ok(()),
            EditState::NotStarted => Err(violation("call before open_root")),
            EditState::Finished => Err(violation("call after the edit finished")),
            EditState::Aborted => Err(violation("call after the edit was aborted")),
        }
    }

    fn dir(&self, baton: &DirBaton) -> Result<&DirState> {
        self.dirs
            .get(&baton.id().get())
            .ok_or_else(|| violation("use of a closed or foreign directory baton"))
    }

    fn file(&self, baton: &FileBaton) -> Result<&FileState> {
        self.files
            .get(&baton.id().get())
            .ok_or_else(|| violation("use of a closed or foreign file baton"))
    }

    /// Verify `path` names a direct child of the directory `dir`, and
    /// return the entry name.
    fn child_name(dir: &DirState, path: &RelPath) -> Result<String> {
        match path.parent() {
            Some(parent) if parent == dir.path => Ok(path.name().to_string()),
            _ => Err(violation(format!(
                "path '{}' is not a direct child of open directory '{}'",
                path, dir.path
            ))),
        }
    }
}

impl<E: Editor> Editor for ValidatingEditor<E> {
    fn open_root(&mut self, base_revision: Option<Revnum>) -> Result<DirBaton> {
        match self.state {
            EditState::NotStarted => {}
            EditState::Active => return Err(violation("open_root called twice")),
            EditState::Finished | EditState::Aborted => {
                return Err(violation("open_root after the edit ended"))
            }
        }
        let inner = self.inner.open_root(base_revision)?;
        self.state = EditState::Active;
        let id = self.mint();
        self.dirs.insert(
            id,
            DirState {
                inner,
                path: RelPath::root(),
                parent: None,
                open_children: 0,
                names: HashMap::new(),
            },
        );
        Ok(DirBaton::new(BatonId::new(id)))
    }

    fn delete_entry(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        revision: Option<Revnum>,
    ) -> Result {
        self.require_active()?;
        let state = self.dir(dir)?;
        let name = Self::child_name(state, path)?;
        match state.names.get(&name) {
            Some(NameFate::Deleted) => {
                return Err(violation(format!("'{}' deleted twice", path)))
            }
            Some(NameFate::Added) => {
                return Err(violation(format!(
                    "'{}' deleted after being added in the same edit",
                    path
                )))
            }
            Some(NameFate::Opened) => {
                return Err(violation(format!(
                    "'{}' deleted after being opened in the same edit",
                    path
                )))
            }
            None => {}
        }
        let Self { inner, dirs, .. } = self;
        let state = dirs.get_mut(&dir.id().get()).expect("verified above");
        inner.delete_entry(&state.inner, path, revision)?;
        state.names.insert(name, NameFate::Deleted);
        Ok(())
    }

    fn add_directory(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        copy_from: Option<&CopySource>,
    ) -> Result<DirBaton> {
        self.require_active()?;
        let state = self.dir(dir)?;
        let name = Self::child_name(state, path)?;
        match state.names.get(&name) {
            Some(NameFate::Added) | Some(NameFate::Opened) => {
                return Err(violation(format!("'{}' already visited in this edit", path)))
            }
            Some(NameFate::Deleted) | None => {}
        }
        let parent_id = dir.id().get();
        let child = {
            let Self { inner, dirs, .. } = self;
            let parent = dirs.get_mut(&parent_id).expect("verified above");
            let child = inner.add_directory(&parent.inner, path, copy_from)?;
            parent.names.insert(name, NameFate::Added);
            parent.open_children += 1;
            child
        };
        let inner = child;
        let id = self.mint();
        self.dirs.insert(
            id,
            DirState {
                inner,
                path: path.clone(),
                parent: Some(parent_id),
                open_children: 0,
                names: HashMap::new(),
            },
        );
        Ok(DirBaton::new(BatonId::new(id)))
    }

    fn open_directory(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        base_revision: Option<Revnum>,
    ) -> Result<DirBaton> {
        self.require_active()?;
        let state = self.dir(dir)?;
        let name = Self::child_name(state, path)?;
        match state.names.get(&name) {
            Some(NameFate::Deleted) => {
                return Err(violation(format!("'{}' opened after being deleted", path)))
            }
            Some(NameFate::Added) | Some(NameFate::Opened) => {
                return Err(violation(format!("'{}' already visited in this edit", path)))
            }
            None => {}
        }
        let parent_id = dir.id().get();
        let child = {
            let Self { inner, dirs, .. } = self;
            let parent = dirs.get_mut(&parent_id).expect("verified above");
            let child = inner.open_directory(&parent.inner, path, base_revision)?;
            parent.names.insert(name, NameFate::Opened);
            parent.open_children += 1;
            child
        };
        let inner = child;
        let id = self.mint();
        self.dirs.insert(
            id,
            DirState {
                inner,
                path: path.clone(),
                parent: Some(parent_id),
                open_children: 0,
                names: HashMap::new(),
            },
        );
        Ok(DirBaton::new(BatonId::new(id)))
    }

    fn change_dir_prop(
        &mut self,
        dir: &DirBaton,
        name: &PropName,
        value: Option<&PropValue>,
    ) -> Result {
        self.require_active()?;
        self.dir(dir)?;
        let Self { inner, dirs, .. } = self;
        let state = dirs.get(&dir.id().get()).expect("verified above");
        inner.change_dir_prop(&state.inner, name, value)
    }

    fn close_directory(&mut self, dir: DirBaton) -> Result {
        self.require_active()?;
        let state = self.dir(&dir)?;
        if state.open_children > 0 {
            return Err(violation(format!(
                "close_directory of '{}' with {} child baton(s) still open",
                state.path,
                state.open_children
            )));
        }
        let id = dir.id().get();
        let state = self.dirs.remove(&id).expect("looked up above");
        match self.inner.close_directory(state.inner) {
            Ok(()) => {
                if let Some(parent) = state.parent {
                    if let Some(p) = self.dirs.get_mut(&parent) {
                        p.open_children -= 1;
                    }
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn add_file(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        copy_from: Option<&CopySource>,
    ) -> Result<FileBaton> {
        self.require_active()?;
        let state = self.dir(dir)?;
        let name = Self::child_name(state, path)?;
        match state.names.get(&name) {
            Some(NameFate::Added) | Some(NameFate::Opened) => {
                return Err(violation(format!("'{}' already visited in this edit", path)))
            }
            Some(NameFate::Deleted) | None => {}
        }
        let parent_id = dir.id().get();
        let child = {
            let Self { inner, dirs, .. } = self;
            let parent = dirs.get_mut(&parent_id).expect("verified above");
            let child = inner.add_file(&parent.inner, path, copy_from)?;
            parent.names.insert(name, NameFate::Added);
            parent.open_children += 1;
            child
        };
        let inner = child;
        let id = self.mint();
        self.files.insert(
            id,
            FileState {
                inner,
                path: path.clone(),
                parent: parent_id,
                delta_installed: false,
                delta_live: false,
            },
        );
        Ok(FileBaton::new(BatonId::new(id)))
    }

    fn open_file(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        base_revision: Option<Revnum>,
    ) -> Result<FileBaton> {
        self.require_active()?;
        let state = self.dir(dir)?;
        let name = Self::child_name(state, path)?;
        match state.names.get(&name) {
            Some(NameFate::Deleted) => {
                return Err(violation(format!("'{}' opened after being deleted", path)))
            }
            Some(NameFate::Added) | Some(NameFate::Opened) => {
                return Err(violation(format!("'{}' already visited in this edit", path)))
            }
            None => {}
        }
        let parent_id = dir.id().get();
        let child = {
            let Self { inner, dirs, .. } = self;
            let parent = dirs.get_mut(&parent_id).expect("verified above");
            let child = inner.open_file(&parent.inner, path, base_revision)?;
            parent.names.insert(name, NameFate::Opened);
            parent.open_children += 1;
            child
        };
        let inner = child;
        let id = self.mint();
        self.files.insert(
            id,
            FileState {
                inner,
                path: path.clone(),
                parent: parent_id,
                delta_installed: false,
                delta_live: false,
            },
        );
        Ok(FileBaton::new(BatonId::new(id)))
    }

    fn apply_textdelta(
        &mut self,
        file: &FileBaton,
        base_checksum: Option<&Checksum>,
    ) -> Result<DeltaHandle> {
        self.require_active()?;
        let state = self.file(file)?;
        if state.delta_installed {
            return Err(violation(format!(
                "second textdelta applied to '{}'",
                state.path
            )));
        }
        let file_id = file.id().get();
        let handle = {
            let Self { inner, files, .. } = self;
            let f = files.get_mut(&file_id).expect("verified above");
            let handle = inner.apply_textdelta(&f.inner, base_checksum)?;
            f.delta_installed = true;
            f.delta_live = true;
            handle
        };
        let inner = handle;
        let id = self.mint();
        self.handles.insert(id, HandleState { inner, file: file_id });
        Ok(DeltaHandle::new(BatonId::new(id)))
    }

    fn push_window(&mut self, handle: &DeltaHandle, window: Option<DeltaWindow>) -> Result {
        self.require_active()?;
        let id = handle.id().get();
        if !self.handles.contains_key(&id) {
            return Err(violation("push_window on a retired or foreign delta handle"));
        }
        let terminal = window.is_none();
        {
            let Self { inner, handles, .. } = self;
            let state = handles.get(&id).expect("checked above");
            inner.push_window(&state.inner, window)?;
        }
        if terminal {
            let retired = self.handles.remove(&id).expect("checked above");
            if let Some(f) = self.files.get_mut(&retired.file) {
                f.delta_live = false;
            }
        }
        Ok(())
    }

    fn change_file_prop(
        &mut self,
        file: &FileBaton,
        name: &PropName,
        value: Option<&PropValue>,
    ) -> Result {
        self.require_active()?;
        self.file(file)?;
        let Self { inner, files, .. } = self;
        let state = files.get(&file.id().get()).expect("verified above");
        inner.change_file_prop(&state.inner, name, value)
    }

    fn close_file(&mut self, file: FileBaton, text_checksum: Option<&Checksum>) -> Result {
        self.require_active()?;
        let state = self.file(&file)?;
        if state.delta_live {
            return Err(violation(format!(
                "close_file on '{}' before its textdelta was terminated",
                state.path
            )));
        }
        let id = file.id().get();
        let state = self.files.remove(&id).expect("looked up above");
        match self.inner.close_file(state.inner, text_checksum) {
            Ok(()) => {
                if let Some(p) = self.dirs.get_mut(&state.parent) {
                    p.open_children -= 1;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn close_edit(&mut self) -> Result {
        self.require_active()?;
        if !self.dirs.is_empty() || !self.files.is_empty() || !self.handles.is_empty() {
            return Err(violation(format!(
                "close_edit with {} baton(s) still open",
                self.dirs.len() + self.files.len() + self.handles.len()
            )));
        }
        self.inner.close_edit()?;
        self.state = EditState::Finished;
        Ok(())
    }

    fn abort_edit(&mut self) -> Result {
        match self.state {
            EditState::Finished => return Err(violation("abort_edit after close_edit")),
            EditState::Aborted => return Err(violation("abort_edit called twice")),
            EditState::NotStarted | EditState::Active => {}
        }
        self.inner.abort_edit()?;
        self.state = EditState::Aborted;
        self.dirs.clear();
        self.files.clear();
        self.handles.clear();
        Ok(())
    }
}
