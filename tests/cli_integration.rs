//! Integration tests for the `tw` binary.
//!
//! These tests build a repository dump on disk, then exercise the CLI the
//! way a user would, asserting on stdout/stderr and exit codes.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use treewire::storage::memory::MemoryRepo;

/// Test fixture holding a repository dump in a temp directory.
struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Two revisions: r1 adds trunk/hello.txt and trunk/notes/a.txt,
    /// r2 rewrites hello.txt.
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let repo = MemoryRepo::new();
        repo.commit_files(
            "alice",
            "initial import",
            &[
                ("trunk/hello.txt", "hello, world\n"),
                ("trunk/notes/a.txt", "first note\n"),
            ],
        )
        .unwrap();
        repo.commit_files("bob", "rewrite greeting", &[("trunk/hello.txt", "hi\n")])
            .unwrap();
        repo.save(&dir.path().join("repo.json")).unwrap();
        Self { dir }
    }

    fn dump(&self) -> PathBuf {
        self.dir.path().join("repo.json")
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn tw(&self) -> Command {
        Command::cargo_bin("tw").expect("binary builds")
    }
}

#[test]
fn checkout_materializes_head() {
    let repo = TestRepo::new();
    let dest = repo.path().join("wc");

    repo.tw()
        .args(["checkout"])
        .arg(repo.dump())
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Checked out revision r2"));

    assert_eq!(fs::read_to_string(dest.join("trunk/hello.txt")).unwrap(), "hi\n");
    assert_eq!(
        fs::read_to_string(dest.join("trunk/notes/a.txt")).unwrap(),
        "first note\n"
    );
}

#[test]
fn checkout_pins_older_revision() {
    let repo = TestRepo::new();
    let dest = repo.path().join("wc1");

    repo.tw()
        .args(["checkout", "-r", "1"])
        .arg(repo.dump())
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Checked out revision r1"));

    assert_eq!(
        fs::read_to_string(dest.join("trunk/hello.txt")).unwrap(),
        "hello, world\n"
    );
}

#[test]
fn checkout_into_existing_destination_fails_cleanly() {
    let repo = TestRepo::new();
    let dest = repo.path().join("occupied");
    fs::create_dir(&dest).unwrap();

    repo.tw()
        .args(["checkout"])
        .arg(repo.dump())
        .arg(&dest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn missing_dump_reports_storage_error() {
    let repo = TestRepo::new();

    repo.tw()
        .args(["checkout"])
        .arg(repo.path().join("nope.json"))
        .arg(repo.path().join("wc"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[storage]: cannot read repository dump"))
        .stderr(predicate::str::contains("caused by"));
}

#[test]
fn log_shows_both_revisions_newest_first() {
    let repo = TestRepo::new();

    let assert = repo.tw().arg("log").arg(repo.dump()).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();

    let r2 = stdout.find("r2 | bob").expect("r2 header present");
    let r1 = stdout.find("r1 | alice").expect("r1 header present");
    assert!(r2 < r1);
    assert!(stdout.contains("rewrite greeting"));
    assert!(stdout.contains("----------------------------------------"));
}

#[test]
fn verbose_log_lists_changed_paths() {
    let repo = TestRepo::new();

    repo.tw()
        .args(["log", "-v", "--revisions", "2:2"])
        .arg(repo.dump())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Changed paths:")
                .and(predicate::str::contains("M /trunk/hello.txt"))
                .and(predicate::str::contains("r1").not()),
        );
}

#[test]
fn log_filters_by_path() {
    let repo = TestRepo::new();

    repo.tw()
        .args(["log", "--path", "trunk/notes"])
        .arg(repo.dump())
        .assert()
        .success()
        .stdout(predicate::str::contains("r1").and(predicate::str::contains("r2").not()));
}

#[test]
fn ls_lists_directory_entries() {
    let repo = TestRepo::new();

    repo.tw()
        .arg("ls")
        .arg(repo.dump())
        .arg("trunk")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello.txt").and(predicate::str::contains("notes/")));
}

#[test]
fn ls_on_a_file_is_an_error() {
    let repo = TestRepo::new();

    repo.tw()
        .arg("ls")
        .arg(repo.dump())
        .arg("trunk/hello.txt")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a directory"));
}

#[test]
fn lock_then_unlock_round_trips_through_the_dump() {
    let repo = TestRepo::new();

    let assert = repo
        .tw()
        .args(["lock", "--owner", "carol"])
        .arg(repo.dump())
        .arg("trunk/hello.txt")
        .assert()
        .success()
        .stdout(predicate::str::contains("locked by 'carol'"));
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let token = stdout
        .lines()
        .find(|line| line.starts_with("opaquelocktoken:"))
        .expect("token printed")
        .to_string();

    // A second lock attempt conflicts.
    repo.tw()
        .args(["lock", "--owner", "dave"])
        .arg(repo.dump())
        .arg("trunk/hello.txt")
        .assert()
        .failure()
        .stderr(predicate::str::contains("lock"));

    // Unlocking with the wrong token fails, with the right token succeeds.
    repo.tw()
        .args(["unlock", "--token", "opaquelocktoken:bogus"])
        .arg(repo.dump())
        .arg("trunk/hello.txt")
        .assert()
        .failure();
    repo.tw()
        .args(["unlock", "--token", &token])
        .arg(repo.dump())
        .arg("trunk/hello.txt")
        .assert()
        .success()
        .stdout(predicate::str::contains("unlocked"));
}

#[test]
fn break_lock_needs_no_token() {
    let repo = TestRepo::new();

    repo.tw()
        .args(["lock", "--owner", "carol"])
        .arg(repo.dump())
        .arg("trunk/hello.txt")
        .assert()
        .success();
    repo.tw()
        .args(["unlock", "--break-lock"])
        .arg(repo.dump())
        .arg("trunk/hello.txt")
        .assert()
        .success();
}

#[test]
fn quiet_suppresses_chatter_but_not_the_token() {
    let repo = TestRepo::new();

    let assert = repo
        .tw()
        .args(["-q", "lock", "--owner", "carol"])
        .arg(repo.dump())
        .arg("trunk/hello.txt")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(!stdout.contains("locked by"));
    assert!(stdout.trim().starts_with("opaquelocktoken:"));
}

#[test]
fn completion_emits_a_script() {
    let repo = TestRepo::new();

    repo.tw()
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tw"));
}
