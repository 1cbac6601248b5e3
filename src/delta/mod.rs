//! delta
//!
//! The tree-delta editor protocol.
//!
//! # Architecture
//!
//! - [`editor`] - the [`Editor`](editor::Editor) capability trait, its call
//!   grammar, and the opaque batons that name in-progress tree positions
//! - [`window`] - streamed text-delta windows and the builder/applier pair
//! - [`validate`] - a wrapper editor that mechanically enforces the grammar
//! - [`tree`] - the in-memory tree model and the reference editor over it
//!
//! Drivers live in [`crate::session`]; concrete storage-backed editors in
//! [`crate::storage`].

pub mod editor;
pub mod tree;
pub mod validate;
pub mod window;

pub use editor::{BatonId, DeltaHandle, DirBaton, Editor, FileBaton};
pub use tree::{Tree, TreeEditor, TreeNode};
pub use validate::ValidatingEditor;
pub use window::{
    apply_window, apply_windows, build_windows, DeltaWindow, WindowOp, DEFAULT_CHUNK_SIZE,
};
