//! session::wc
//!
//! Checkout-to-disk editor.
//!
//! # Architecture
//!
//! [`WorkingCopyEditor`] materializes a checkout drive as files on disk.
//! Nothing is ever written at the destination directly: the whole edit
//! builds up in a hidden staging directory next to the destination, and a
//! successful `close_edit` promotes it with a single rename. `abort_edit`
//! removes the staging directory, so an interrupted or cancelled checkout
//! leaves no partial destination behind.
//!
//! A sibling lock file with an OS-level exclusive lock (via `fs2`) guards
//! the destination while the edit runs, so two processes cannot stage into
//! the same place. The lock is released on drop (RAII).
//!
//! Property changes are accepted and discarded; a plain directory tree has
//! no place to keep them.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::core::error::{Error, ErrorCode, Result, ResultExt};
use crate::core::types::{Checksum, CopySource, PropName, PropValue, RelPath, Revnum};
use crate::delta::editor::{BatonId, DeltaHandle, DirBaton, Editor, FileBaton};
use crate::delta::window::{apply_window, DeltaWindow};

/// Exclusive lock guarding one checkout destination.
///
/// Released on drop.
#[derive(Debug)]
struct EditLock {
    path: PathBuf,
    file: Option<File>,
}

impl EditLock {
    /// Non-blocking acquire; an already-held lock is a `LockConflict`.
    fn acquire(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(ErrorCode::Storage, || {
                format!("cannot open lock file '{}'", path.display())
            })?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                file: Some(file),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(Error::new(
                ErrorCode::LockConflict,
                format!(
                    "another process is already checking out into '{}'",
                    path.display()
                ),
            )),
            Err(e) => Err(Error::wrap(
                ErrorCode::Storage,
                format!("cannot lock '{}'", path.display()),
                e.into(),
            )),
        }
    }

    fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
        let _ = fs::remove_file(&self.path);
    }
}

impl Drop for EditLock {
    fn drop(&mut self) {
        self.release();
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
struct WcDelta {
    file: u64,
    path: RelPath,
    baseline: Vec<u8>,
    out: Vec<u8>,
}

/// An [`Editor`] that stages an edit on disk and promotes it atomically.
///
/// Built for fresh checkouts: the destination must not exist yet.
#[derive(Debug)]
pub struct WorkingCopyEditor {
    dest: PathBuf,
    staging: PathBuf,
    lock: Option<EditLock>,
    state: EditState,
    open: HashMap<u64, RelPath>,
    deltas: HashMap<u64, WcDelta>,
    next_id: u64,
}

impl WorkingCopyEditor {
    /// Prepare an editor targeting `dest`.
    ///
    /// Fails when the destination already exists, its parent does not, or
    /// another editor holds the destination's lock. Leftover staging from
    /// a crashed run is cleared.
    pub fn new(dest: &Path) -> Result<Self> {
        if dest.exists() {
            return Err(Error::new(
                ErrorCode::Validation,
                format!("destination '{}' already exists", dest.display()),
            ));
        }
        let parent = dest.parent().filter(|p| !p.as_os_str().is_empty());
        let parent = match parent {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from("."),
        };
        if !parent.is_dir() {
            return Err(Error::new(
                ErrorCode::Validation,
                format!("parent directory '{}' does not exist", parent.display()),
            ));
        }
        let name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::new(
                    ErrorCode::Validation,
                    format!("destination '{}' has no usable name", dest.display()),
                )
            })?;
        let lock = EditLock::acquire(parent.join(format!(".{}.twlock", name)))?;
        let staging = parent.join(format!(".{}.staging", name));
        if staging.exists() {
            fs::remove_dir_all(&staging).with_context(ErrorCode::Storage, || {
                format!("cannot clear stale staging '{}'", staging.display())
            })?;
        }
        Ok(Self {
            dest: dest.to_path_buf(),
            staging,
            lock: Some(lock),
            state: EditState::NotStarted,
            open: HashMap::new(),
            deltas: HashMap::new(),
            next_id: 0,
        })
    }

    /// Where the checkout will land.
    pub fn destination(&self) -> &Path {
        &self.dest
    }

    fn mint(&mut self, path: RelPath) -> BatonId {
        let id = BatonId::new(self.next_id);
        self.next_id += 1;
        self.open.insert(id.get(), path);
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

    fn path_of(&self, id: BatonId) -> Result<RelPath> {
        self.open
            .get(&id.get())
            .cloned()
            .ok_or_else(|| Error::new(ErrorCode::ProtocolViolation, "unknown or closed baton"))
    }

    fn staged(&self, path: &RelPath) -> PathBuf {
        let mut out = self.staging.clone();
        for component in path.components() {
            out.push(component);
        }
        out
    }

    fn cleanup_staging(&self) {
        if self.staging.exists() {
            let _ = fs::remove_dir_all(&self.staging);
        }
    }
}

impl Editor for WorkingCopyEditor {
    fn open_root(&mut self, _base_revision: Option<Revnum>) -> Result<DirBaton> {
        if self.state != EditState::NotStarted {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                "open_root called twice",
            ));
        }
        fs::create_dir(&self.staging).with_context(ErrorCode::Storage, || {
            format!("cannot create staging '{}'", self.staging.display())
        })?;
        self.state = EditState::Active;
        Ok(DirBaton::new(self.mint(RelPath::root())))
    }

    fn delete_entry(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        _revision: Option<Revnum>,
    ) -> Result {
        self.require_active()?;
        self.path_of(dir.id())?;
        let target = self.staged(path);
        if target.is_dir() {
            fs::remove_dir_all(&target)?;
        } else if target.exists() {
            fs::remove_file(&target)?;
        } else {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("no staged entry '{}' to delete", path),
            ));
        }
        Ok(())
    }

    fn add_directory(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        _copy_from: Option<&CopySource>,
    ) -> Result<DirBaton> {
        self.require_active()?;
        self.path_of(dir.id())?;
        fs::create_dir(self.staged(path)).with_context(ErrorCode::Storage, || {
            format!("cannot create staged directory '{}'", path)
        })?;
        Ok(DirBaton::new(self.mint(path.clone())))
    }

    fn open_directory(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        _base_revision: Option<Revnum>,
    ) -> Result<DirBaton> {
        self.require_active()?;
        self.path_of(dir.id())?;
        if !self.staged(path).is_dir() {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("open_directory of nonexistent '{}'", path),
            ));
        }
        Ok(DirBaton::new(self.mint(path.clone())))
    }

    fn change_dir_prop(
        &mut self,
        dir: &DirBaton,
        _name: &PropName,
        _value: Option<&PropValue>,
    ) -> Result {
        self.require_active()?;
        self.path_of(dir.id())?;
        Ok(())
    }

    fn close_directory(&mut self, dir: DirBaton) -> Result {
        self.require_active()?;
        self.path_of(dir.id())?;
        self.open.remove(&dir.id().get());
        Ok(())
    }

    fn add_file(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        _copy_from: Option<&CopySource>,
    ) -> Result<FileBaton> {
        self.require_active()?;
        self.path_of(dir.id())?;
        let target = self.staged(path);
        if target.exists() {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("staged entry '{}' already exists", path),
            ));
        }
        fs::write(&target, [])
            .with_context(ErrorCode::Storage, || format!("cannot stage file '{}'", path))?;
        Ok(FileBaton::new(self.mint(path.clone())))
    }

    fn open_file(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        _base_revision: Option<Revnum>,
    ) -> Result<FileBaton> {
        self.require_active()?;
        self.path_of(dir.id())?;
        if !self.staged(path).is_file() {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("open_file of nonexistent '{}'", path),
            ));
        }
        Ok(FileBaton::new(self.mint(path.clone())))
    }

    fn apply_textdelta(
        &mut self,
        file: &FileBaton,
        base_checksum: Option<&Checksum>,
    ) -> Result<DeltaHandle> {
        self.require_active()?;
        let path = self.path_of(file.id())?;
        if self.deltas.values().any(|d| d.file == file.id().get()) {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("textdelta already applied to '{}'", path),
            ));
        }
        let baseline = fs::read(self.staged(&path))
            .with_context(ErrorCode::Storage, || format!("cannot read staged '{}'", path))?;
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
            WcDelta {
                file: file.id().get(),
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
                let target = self.staged(&delta.path);
                fs::write(&target, &delta.out).with_context(ErrorCode::Storage, || {
                    format!("cannot write staged '{}'", delta.path)
                })
            }
        }
    }

    fn change_file_prop(
        &mut self,
        file: &FileBaton,
        _name: &PropName,
        _value: Option<&PropValue>,
    ) -> Result {
        self.require_active()?;
        self.path_of(file.id())?;
        Ok(())
    }

    fn close_file(&mut self, file: FileBaton, text_checksum: Option<&Checksum>) -> Result {
        self.require_active()?;
        let path = self.path_of(file.id())?;
        if self.deltas.values().any(|d| d.file == file.id().get()) {
            return Err(Error::new(
                ErrorCode::ProtocolViolation,
                format!("close_file on '{}' with unterminated textdelta", path),
            ));
        }
        if let Some(expected) = text_checksum {
            let content = fs::read(self.staged(&path))
                .with_context(ErrorCode::Storage, || format!("cannot read staged '{}'", path))?;
            let actual = Checksum::of(&content);
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
        fs::rename(&self.staging, &self.dest).with_context(ErrorCode::Storage, || {
            format!("cannot promote staging to '{}'", self.dest.display())
        })?;
        if let Some(mut lock) = self.lock.take() {
            lock.release();
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
        self.cleanup_staging();
        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }
        self.open.clear();
        self.deltas.clear();
        self.state = EditState::Aborted;
        Ok(())
    }
}

impl Drop for WorkingCopyEditor {
    fn drop(&mut self) {
        // An edit that never finished leaves nothing behind.
        if !matches!(self.state, EditState::Finished) {
            self.cleanup_staging();
        }
    }
}
