//! session
//!
//! The driver side of the protocol.
//!
//! # Architecture
//!
//! A [`Session`] binds a storage oracle, a [`CancelToken`], and a window
//! chunk size, and exposes the three drives: `checkout`, `update`, and
//! `commit` (in [`driver`]). Each drive is one complete editor run with a
//! hard guarantee: an `Ok` return means `close_edit` was observed by the
//! editor, an `Err` return means `abort_edit` was, and never both.
//!
//! Cancellation is polled between node boundaries only; a cancelled drive
//! aborts the edit and surfaces a `Cancelled` error distinct from real
//! failures.
//!
//! [`WorkingCopyEditor`] (in [`wc`]) is the editor `checkout` is normally
//! pointed at: it stages to disk and promotes atomically.

pub mod cancel;
pub mod driver;
pub mod wc;

pub use cancel::CancelToken;
pub use wc::WorkingCopyEditor;

use crate::core::error::{Error, Result};
use crate::core::lock::{Lock, LockToken};
use crate::core::types::{RelPath, RevisionSpec, Revnum};
use crate::delta::editor::Editor;
use crate::delta::window::DEFAULT_CHUNK_SIZE;
use crate::storage::{LockParams, Storage};

/// One bound conversation with a repository.
pub struct Session<'a> {
    storage: &'a dyn Storage,
    cancel: CancelToken,
    chunk_size: usize,
}

impl<'a> Session<'a> {
    /// Bind a session to a storage oracle.
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self {
            storage,
            cancel: CancelToken::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Use an externally shared cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the window chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0);
        self.chunk_size = chunk_size;
        self
    }

    /// The bound storage.
    pub fn storage(&self) -> &dyn Storage {
        self.storage
    }

    pub(crate) fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Resolve a revision request against head.
    pub fn resolve_revision(&self, spec: RevisionSpec) -> Result<Revnum> {
        let head = self.storage.head_revision()?;
        match spec {
            RevisionSpec::Head => Ok(head),
            RevisionSpec::Number(rev) if rev <= head => Ok(rev),
            RevisionSpec::Number(rev) => Err(Error::new(
                crate::core::error::ErrorCode::Validation,
                format!("revision {} is beyond head {}", rev, head),
            )),
        }
    }

    /// Acquire a lock through the bound storage.
    pub fn lock_path(&self, path: &RelPath, params: &LockParams) -> Result<Lock> {
        self.storage.lock(path, params)
    }

    /// Release a lock through the bound storage.
    pub fn unlock_path(
        &self,
        path: &RelPath,
        token: Option<&LockToken>,
        break_lock: bool,
    ) -> Result {
        self.storage.unlock(path, token, break_lock)
    }
}

/// Run one complete edit: drive, then `close_edit` on success or
/// `abort_edit` on any failure.
///
/// A failing `close_edit` still aborts, and the abort failure, if any, is
/// chained onto the primary error so neither report is lost.
pub(crate) fn run_edit<E: Editor, T>(
    editor: &mut E,
    drive: impl FnOnce(&mut E) -> Result<T>,
) -> Result<T> {
    match drive(editor) {
        Ok(value) => match editor.close_edit() {
            Ok(()) => Ok(value),
            Err(close_err) => Err(abort_after(editor, close_err)),
        },
        Err(err) => Err(abort_after(editor, err)),
    }
}

fn abort_after<E: Editor>(editor: &mut E, primary: Error) -> Error {
    match editor.abort_edit() {
        Ok(()) => primary,
        Err(abort_err) => Error::wrap(
            primary.code(),
            format!("abort_edit also failed: {}", abort_err.message()),
            primary,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorCode;
    use crate::delta::tree::{Tree, TreeEditor};

    #[test]
    fn run_edit_closes_on_success() {
        let mut editor = TreeEditor::new(Tree::empty());
        run_edit(&mut editor, |ed| {
            let root = ed.open_root(None)?;
            ed.close_directory(root)
        })
        .unwrap();
        assert!(editor.take_tree().is_some());
    }

    #[test]
    fn run_edit_aborts_on_drive_failure() {
        let mut editor = TreeEditor::new(Tree::empty());
        let err = run_edit(&mut editor, |ed| {
            let _root = ed.open_root(None)?;
            Err::<(), _>(Error::new(ErrorCode::Transport, "link dropped"))
        })
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Transport);
        assert!(editor.take_tree().is_none());
    }

    #[test]
    fn run_edit_aborts_when_close_fails() {
        let mut editor = TreeEditor::new(Tree::empty());
        // Leaving the root open makes close_edit fail.
        let err = run_edit(&mut editor, |ed| {
            let _root = ed.open_root(None)?;
            Ok(())
        })
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolViolation);
        assert!(editor.take_tree().is_none());
    }
}
