//! Property-based tests for windows, the editor grammar, and errors.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

use proptest::prelude::*;

use treewire::core::error::{Error, ErrorCode};
use treewire::core::types::RelPath;
use treewire::delta::editor::Editor;
use treewire::delta::tree::{Tree, TreeEditor};
use treewire::delta::validate::ValidatingEditor;
use treewire::delta::window::{apply_windows, build_windows, DeltaWindow};
use treewire::session::Session;
use treewire::storage::memory::MemoryRepo;
use treewire::storage::Storage;

/// Strategy for generating valid path component characters.
fn component_char() -> impl Strategy<Value = char> {
    prop_oneof![
        prop::char::range('a', 'z'),
        prop::char::range('0', '9'),
        Just('-'),
        Just('_'),
    ]
}

/// Strategy for generating a single path component.
fn component() -> impl Strategy<Value = String> {
    prop::collection::vec(component_char(), 1..12)
        .prop_map(|chars| chars.into_iter().collect())
}

/// Strategy for generating a small flat file set: path -> content.
fn file_set() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(
        (component(), component()).prop_map(|(d, f)| format!("{}/{}", d, f)),
        prop::collection::vec(any::<u8>(), 0..200),
        1..8,
    )
    .prop_map(|m| m.into_iter().collect())
}

/// Strategy for byte buffers large enough to cross chunk boundaries.
fn buffer() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..600)
}

proptest! {
    /// Windows built from any baseline/target pair reproduce the target.
    #[test]
    fn built_windows_reproduce_target(
        baseline in buffer(),
        target in buffer(),
        chunk in 1usize..64,
    ) {
        let windows = build_windows(&baseline, &target, chunk);
        let rebuilt = apply_windows(&baseline, &windows).unwrap();
        prop_assert_eq!(rebuilt, target);
    }

    /// A pure-insert stream needs no baseline at all.
    #[test]
    fn insert_only_windows_ignore_baseline(
        baseline in buffer(),
        target in buffer(),
        chunk in 1usize..64,
    ) {
        let windows: Vec<DeltaWindow> = target
            .chunks(chunk)
            .map(|piece| DeltaWindow::insert(piece.to_vec()))
            .collect();
        let rebuilt = apply_windows(&baseline, &windows).unwrap();
        let total: u64 = windows.iter().map(|w| w.output_len()).sum();
        prop_assert_eq!(total, target.len() as u64);
        prop_assert_eq!(rebuilt, target);
    }

    /// Any committed file set survives a validated checkout byte for byte.
    #[test]
    fn random_commits_check_out_intact(
        files in file_set(),
        chunk in 1usize..64,
    ) {
        let repo = MemoryRepo::new();
        // commit_files takes text; hex-encode arbitrary bytes.
        let encoded: Vec<(String, String)> = files
            .iter()
            .map(|(p, c)| (p.clone(), hex::encode(c)))
            .collect();
        let borrowed: Vec<(&str, &str)> = encoded
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_str()))
            .collect();
        repo.commit_files("prop", "generated", &borrowed).unwrap();

        let mut editor = ValidatingEditor::new(TreeEditor::new(Tree::empty()));
        Session::new(&repo)
            .with_chunk_size(chunk)
            .checkout(None, &mut editor)
            .unwrap();
        let tree = editor.inner_mut().take_tree().unwrap();
        prop_assert_eq!(&tree, &repo.tree_at(repo.head_revision().unwrap()).unwrap());
        for (path, content) in &encoded {
            let rel = RelPath::new(path.as_str()).unwrap();
            prop_assert_eq!(tree.file_content(&rel), Some(content.as_bytes()));
        }
    }

    /// Closing a directory with open children is always a protocol violation.
    #[test]
    fn close_with_open_child_always_rejected(name in component()) {
        let mut editor = ValidatingEditor::new(TreeEditor::new(Tree::empty()));
        let root = editor.open_root(None).unwrap();
        let path = RelPath::new(name).unwrap();
        let _child = editor.add_directory(&root, &path, None).unwrap();
        let err = editor.close_directory(root).unwrap_err();
        prop_assert_eq!(err.code(), ErrorCode::ProtocolViolation);
    }

    /// Touching the same name twice in one directory (other than
    /// delete-then-add) is always rejected.
    #[test]
    fn double_add_always_rejected(name in component()) {
        let mut editor = ValidatingEditor::new(TreeEditor::new(Tree::empty()));
        let root = editor.open_root(None).unwrap();
        let path = RelPath::new(name).unwrap();
        let file = editor.add_file(&root, &path, None).unwrap();
        editor.close_file(file, None).unwrap();
        let err = editor.add_file(&root, &path, None).unwrap_err();
        prop_assert_eq!(err.code(), ErrorCode::ProtocolViolation);
    }

    /// A chain of N links renders as exactly N lines and iterates N times.
    #[test]
    fn error_chain_depth_is_preserved(depth in 1usize..10) {
        let mut err = Error::new(ErrorCode::Storage, "link 0");
        for i in 1..depth {
            err = Error::wrap(ErrorCode::Transport, format!("link {}", i), err);
        }
        prop_assert_eq!(err.chain().count(), depth);
        let rendered = err.render();
        prop_assert_eq!(rendered.lines().count(), depth);
        // Outermost first.
        let outermost = format!("link {}", depth - 1);
        let first_line = rendered.lines().next().unwrap();
        prop_assert!(
            first_line.contains(&outermost),
            "first rendered line '{}' does not name '{}'",
            first_line,
            outermost
        );
    }
}

#[test]
fn empty_window_sequence_is_the_empty_file() {
    assert_eq!(apply_windows(b"anything", &[]).unwrap(), Vec::<u8>::new());
}
