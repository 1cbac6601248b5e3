//! delta::editor
//!
//! The tree-delta editor capability trait and its opaque batons.
//!
//! # Protocol
//!
//! This is a two-role protocol. The **driver** knows what changed (by
//! walking a source tree, a revision diff, or a working-copy scan) and
//! issues calls in a fixed grammar. The **editor** implements this trait
//! and has no knowledge of why a call happens, only what to do with it.
//!
//! The call grammar, per tree position:
//!
//! ```text
//! open_root                                  (exactly once, first call)
//! directory: delete_entry | add_directory | open_directory
//!          | add_file | open_file | change_dir_prop ...
//!          then exactly one close_directory
//! file:      apply_textdelta? push_window* (None terminates)
//!          | change_file_prop ...
//!          then exactly one close_file
//! edit:      close_edit (after root closed)  XOR  abort_edit (any time)
//! ```
//!
//! Parents are opened before their children; children are closed before
//! their parents. `delete_entry` for a name must precede a re-add of that
//! name in the same directory pass (delete-then-add denotes replace).
//!
//! # Batons
//!
//! Batons are opaque handles naming one in-progress tree position. They are
//! deliberately neither `Clone` nor `Copy`, and the `close_*` calls consume
//! them, so a well-typed driver cannot reference a node after closing it.
//! Editors mint batons from their own arena ids via [`DirBaton::new`] and
//! look state up again through [`DirBaton::id`]; drivers must treat the id
//! as meaningless.
//!
//! # Failure
//!
//! Any call may fail. A driver must never continue the grammar after a
//! failed call: it aborts the edit and surfaces the error. Once
//! `abort_edit` arrives the editor releases every resource tied to its
//! batons, including those mid-traversal, and treats partially-applied
//! state as rolled back or flagged incomplete.

use crate::core::error::Result;
use crate::core::types::{Checksum, CopySource, PropName, PropValue, RelPath, Revnum};
use crate::delta::window::DeltaWindow;

/// Opaque identity of a baton within one editor's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatonId(u64);

impl BatonId {
    /// Construct from a raw arena index. Editor-side only.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw arena index. Editor-side only.
    pub const fn get(self) -> u64 {
        self.0
    }
}

macro_rules! baton {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, PartialEq, Eq, Hash)]
        pub struct $name(BatonId);

        impl $name {
            /// Mint a baton over an arena id. Editor-side only.
            pub const fn new(id: BatonId) -> Self {
                Self(id)
            }

            /// The arena id this baton names. Editor-side only.
            pub const fn id(&self) -> BatonId {
                self.0
            }
        }
    };
}

baton! {
    /// Handle for an open directory (including the root).
    ///
    /// Consumed by `close_directory`.
    DirBaton
}

baton! {
    /// Handle for an open file.
    ///
    /// Consumed by `close_file`.
    FileBaton
}

baton! {
    /// Handle for an in-progress text-delta stream on one file.
    ///
    /// Retired by pushing the terminal `None` window.
    DeltaHandle
}

/// The editor side of the tree-delta protocol.
///
/// Implementations execute mutations; they never initiate them. See the
/// module docs for the grammar every driver must follow and
/// [`ValidatingEditor`](crate::delta::validate::ValidatingEditor) for a
/// wrapper that enforces it mechanically.
pub trait Editor {
    /// Begin the edit and open the root directory.
    ///
    /// `base_revision` is the revision the edit is described against, or
    /// `None` when the driver is building a tree from nothing.
    fn open_root(&mut self, base_revision: Option<Revnum>) -> Result<DirBaton>;

    /// Delete the entry at `path`, a child of the directory named by `dir`.
    ///
    /// `revision` is the revision the driver believes it is deleting, for
    /// out-of-date detection; `None` skips the check.
    fn delete_entry(&mut self, dir: &DirBaton, path: &RelPath, revision: Option<Revnum>)
        -> Result;

    /// Add a brand-new directory at `path` under `dir`.
    ///
    /// The entry must not already exist at the revision being described;
    /// `copy_from` carries copy history when the add is a copy.
    fn add_directory(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        copy_from: Option<&CopySource>,
    ) -> Result<DirBaton>;

    /// Open the existing directory at `path` under `dir` for modification.
    fn open_directory(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        base_revision: Option<Revnum>,
    ) -> Result<DirBaton>;

    /// Set (`Some`) or delete (`None`) one property of the open directory.
    ///
    /// From the consumer's perspective property changes apply atomically
    /// with the node's other changes at close time; editors may apply them
    /// immediately.
    fn change_dir_prop(
        &mut self,
        dir: &DirBaton,
        name: &PropName,
        value: Option<&PropValue>,
    ) -> Result;

    /// Close the directory. Valid only once every child baton opened under
    /// it has been closed.
    fn close_directory(&mut self, dir: DirBaton) -> Result;

    /// Add a brand-new file at `path` under `dir`.
    fn add_file(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        copy_from: Option<&CopySource>,
    ) -> Result<FileBaton>;

    /// Open the existing file at `path` under `dir` for modification.
    fn open_file(
        &mut self,
        dir: &DirBaton,
        path: &RelPath,
        base_revision: Option<Revnum>,
    ) -> Result<FileBaton>;

    /// Install a content-change stream on the open file.
    ///
    /// At most one per file, before `close_file`. `base_checksum`, when
    /// given, lets the editor verify it holds the baseline the windows were
    /// computed against. The driver then pushes windows to the returned
    /// handle via [`Editor::push_window`].
    fn apply_textdelta(
        &mut self,
        file: &FileBaton,
        base_checksum: Option<&Checksum>,
    ) -> Result<DeltaHandle>;

    /// Deliver the next window of an installed content-change stream.
    ///
    /// `None` is the distinguished terminal marker; after it the handle is
    /// retired and no further windows may be pushed.
    fn push_window(&mut self, handle: &DeltaHandle, window: Option<DeltaWindow>) -> Result;

    /// Set (`Some`) or delete (`None`) one property of the open file.
    fn change_file_prop(
        &mut self,
        file: &FileBaton,
        name: &PropName,
        value: Option<&PropValue>,
    ) -> Result;

    /// Close the file.
    ///
    /// `text_checksum`, when given, is the checksum of the file's full new
    /// text; editors should verify the content they reconstructed.
    fn close_file(&mut self, file: FileBaton, text_checksum: Option<&Checksum>) -> Result;

    /// Finish the edit successfully. Valid only once, after the root baton
    /// has been closed.
    fn close_edit(&mut self) -> Result;

    /// Abandon the edit. Valid at any point before the edit finishes;
    /// releases all open batons without individual closes.
    fn abort_edit(&mut self) -> Result;
}
