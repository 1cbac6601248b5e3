//! End-to-end scenarios driving real editors through real sessions.

use std::fs;

use chrono::{Duration, Utc};

use treewire::core::error::ErrorCode;
use treewire::core::types::{Checksum, RelPath, Revnum};
use treewire::delta::editor::Editor;
use treewire::delta::tree::{Tree, TreeEditor, TreeNode};
use treewire::delta::validate::ValidatingEditor;
use treewire::delta::window::DeltaWindow;
use treewire::log::{replay, ChangeAction, CollectingReceiver, LogRequest};
use treewire::session::{CancelToken, Session, WorkingCopyEditor};
use treewire::storage::memory::{CommitParams, MemoryRepo};
use treewire::storage::{LockParams, Storage};

fn rel(s: &str) -> RelPath {
    RelPath::new(s).unwrap()
}

/// Build hello-world history: r1 adds greeting/hello.txt.
fn hello_repo() -> MemoryRepo {
    let repo = MemoryRepo::new();
    repo.commit_files("alice", "say hello", &[("greeting/hello.txt", "hello, world\n")])
        .unwrap();
    repo
}

#[test]
fn hello_checkout_reproduces_content() {
    let repo = hello_repo();
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("wc");

    let mut editor = WorkingCopyEditor::new(&dest).unwrap();
    let rev = Session::new(&repo).checkout(None, &mut editor).unwrap();

    assert_eq!(rev, Revnum::new(1));
    assert_eq!(
        fs::read_to_string(dest.join("greeting/hello.txt")).unwrap(),
        "hello, world\n"
    );
}

#[test]
fn delete_entry_drives_through_to_disk_on_update() {
    let repo = hello_repo();
    repo.commit_files("bob", "add farewell", &[("greeting/bye.txt", "bye\n")])
        .unwrap();

    // Build a delete commit through the commit driver.
    let base = repo.head_revision().unwrap();
    let mut target = repo.tree_at(base).unwrap();
    target.remove(&rel("greeting/bye.txt")).unwrap();
    let mut commit = repo.begin_commit(CommitParams::default()).unwrap();
    Session::new(&repo).commit(base, &target, &mut commit).unwrap();

    // An update from r2 must emit the delete.
    let old = repo.tree_at(base).unwrap();
    let mut editor = ValidatingEditor::new(TreeEditor::new(old));
    let rev = Session::new(&repo).update(base, None, &mut editor).unwrap();
    let tree = editor.inner_mut().take_tree().unwrap();
    assert_eq!(rev, Revnum::new(3));
    assert!(tree.file_content(&rel("greeting/bye.txt")).is_none());
    assert!(tree.file_content(&rel("greeting/hello.txt")).is_some());

    // And the change log records it.
    let mut rx = CollectingReceiver::new();
    replay(
        &repo,
        &LogRequest {
            with_paths: true,
            ..LogRequest::default()
        },
        &mut rx,
    )
    .unwrap();
    let newest = &rx.entries()[0];
    let changes = newest.changed_paths.as_ref().unwrap();
    assert_eq!(
        changes[&rel("greeting/bye.txt")].action,
        ChangeAction::Delete
    );
}

#[test]
fn cancellation_mid_drive_leaves_no_partial_destination() {
    // Enough files that cancellation can land mid-traversal.
    let repo = MemoryRepo::new();
    repo.commit_files(
        "alice",
        "bulk import",
        &[
            ("a/one.txt", "1"),
            ("a/two.txt", "2"),
            ("b/three.txt", "3"),
            ("b/four.txt", "4"),
        ],
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("wc");
    let token = CancelToken::new();
    token.cancel();

    let mut editor = WorkingCopyEditor::new(&dest).unwrap();
    let err = Session::new(&repo)
        .with_cancel(token)
        .checkout(None, &mut editor)
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.code(), ErrorCode::Cancelled);
    assert!(!dest.exists());
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn expired_lock_token_fails_commit_without_mutating() {
    let repo = hello_repo();
    let path = rel("greeting/hello.txt");
    let lock = repo
        .lock(
            &path,
            &LockParams {
                owner: "alice".to_string(),
                comment: None,
                expires_at: Some(Utc::now() - Duration::minutes(1)),
            },
        )
        .unwrap();

    let base = repo.head_revision().unwrap();
    let mut target = repo.tree_at(base).unwrap();
    target
        .put(&path, TreeNode::file(&b"too late\n"[..]))
        .unwrap();

    let mut editor = repo
        .begin_commit(CommitParams {
            author: Some("alice".into()),
            message: Some("stale token".into()),
            tokens: vec![lock.token],
        })
        .unwrap();
    let err = Session::new(&repo)
        .commit(base, &target, &mut editor)
        .unwrap_err();

    assert!(err.chain().any(|e| e.code() == ErrorCode::LockConflict));
    assert_eq!(repo.head_revision().unwrap(), base);
    assert_eq!(
        repo.tree_at(base).unwrap().file_content(&path),
        Some(&b"hello, world\n"[..])
    );
}

#[test]
fn replace_round_trips_through_commit_and_checkout() {
    let repo = hello_repo();
    let path = rel("greeting/hello.txt");

    // Replace the file by hand-driving the commit editor.
    let base = repo.head_revision().unwrap();
    let mut editor = ValidatingEditor::new(
        repo.begin_commit(CommitParams {
            author: Some("carol".into()),
            message: Some("replace hello".into()),
            tokens: Vec::new(),
        })
        .unwrap(),
    );
    let root = editor.open_root(Some(base)).unwrap();
    let dir = editor
        .open_directory(&root, &rel("greeting"), Some(base))
        .unwrap();
    editor.delete_entry(&dir, &path, Some(base)).unwrap();
    let file = editor.add_file(&dir, &path, None).unwrap();
    let handle = editor.apply_textdelta(&file, None).unwrap();
    editor
        .push_window(&handle, Some(DeltaWindow::insert(b"replaced\n".to_vec())))
        .unwrap();
    editor.push_window(&handle, None).unwrap();
    editor
        .close_file(file, Some(&Checksum::of(b"replaced\n")))
        .unwrap();
    editor.close_directory(dir).unwrap();
    editor.close_directory(root).unwrap();
    editor.close_edit().unwrap();

    // The log calls it a replace.
    let info = repo
        .revision_info(Revnum::new(2))
        .unwrap()
        .unwrap();
    assert_eq!(
        info.changed_paths.unwrap()[&path].action,
        ChangeAction::Replace
    );

    // A fresh checkout sees the new content.
    let mut out = TreeEditor::new(Tree::empty());
    Session::new(&repo).checkout(None, &mut out).unwrap();
    assert_eq!(
        out.take_tree().unwrap().file_content(&path),
        Some(&b"replaced\n"[..])
    );
}

#[test]
fn checkout_update_convergence() {
    // Checking out r2 directly equals checking out r1 then updating.
    let repo = hello_repo();
    repo.commit_files(
        "bob",
        "grow the tree",
        &[("greeting/hello.txt", "hello again\n"), ("notes/n.txt", "n")],
    )
    .unwrap();

    let mut direct = TreeEditor::new(Tree::empty());
    Session::new(&repo)
        .checkout(Some(Revnum::new(2)), &mut direct)
        .unwrap();
    let direct = direct.take_tree().unwrap();

    let mut stepped = TreeEditor::new(Tree::empty());
    Session::new(&repo)
        .checkout(Some(Revnum::new(1)), &mut stepped)
        .unwrap();
    let r1 = stepped.take_tree().unwrap();
    let mut updater = TreeEditor::new(r1);
    Session::new(&repo)
        .update(Revnum::new(1), Some(Revnum::new(2)), &mut updater)
        .unwrap();
    let stepped = updater.take_tree().unwrap();

    assert_eq!(direct, stepped);
}
