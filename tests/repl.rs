//! Black-box scenarios driving the compiled binary the way a user would:
//! feed it lines on stdin, read what comes back on stdout.
use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn pagedb() -> Command {
    Command::cargo_bin("pagedb").unwrap()
}

fn db_path(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

/// S1 — persistence: insert then reopen, the row survives.
#[test]
fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "s1.db");

    pagedb()
        .arg(&path)
        .write_stdin("insert alice 1 a@x\n.exit\n")
        .assert()
        .success();

    pagedb()
        .arg(&path)
        .write_stdin("select\n.exit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("(1, alice, a@x)"));
}

/// S2 — ordered scan: out-of-order inserts come back sorted by id.
#[test]
fn select_returns_rows_in_key_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "s2.db");

    let output = pagedb()
        .arg(&path)
        .write_stdin("insert c 3 c@x\ninsert a 1 a@x\ninsert b 2 b@x\nselect\n.exit\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();

    let pos1 = stdout.find("(1, a, a@x)").unwrap();
    let pos2 = stdout.find("(2, b, b@x)").unwrap();
    let pos3 = stdout.find("(3, c, c@x)").unwrap();
    assert!(pos1 < pos2 && pos2 < pos3);
}

/// S3 — duplicate insert is rejected, the row count stays one.
#[test]
fn duplicate_insert_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "s3.db");

    pagedb()
        .arg(&path)
        .write_stdin("insert alice 1 a@x\ninsert bob 1 b@x\nselect\n.exit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Error: Duplicate key."))
        .stdout(predicate::str::contains("(1, alice, a@x)"))
        .stdout(predicate::str::contains("(1, bob, b@x)").not());
}

/// S4 — leaf split: 14 ascending inserts overflow a 13-cell leaf into two.
#[test]
fn leaf_split_keeps_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "s4.db");

    let mut script = String::new();
    for id in 1..=14 {
        script.push_str(&format!("insert u{id} {id} u{id}@x\n"));
    }
    script.push_str(".btree\nselect\n.exit\n");

    let output = pagedb().arg(&path).write_stdin(script).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();

    assert!(stdout.contains("- internal (size 1)"));
    for id in 1..=14 {
        assert!(stdout.contains(&format!("({id}, u{id}, u{id}@x)")));
    }
}

/// S5 — internal split: enough ascending inserts to grow a second tree level.
#[test]
fn internal_split_preserves_all_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "s5.db");

    let mut script = String::new();
    for id in 1..=120 {
        script.push_str(&format!("insert u{id} {id} u{id}@x\n"));
    }
    script.push_str("select\n.exit\n");

    let output = pagedb().arg(&path).write_stdin(script).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    for id in 1..=120 {
        assert!(stdout.contains(&format!("({id}, u{id}, u{id}@x)")));
    }
}

/// S6 — a file whose length isn't a whole number of pages is corrupt.
#[test]
fn rejects_a_file_of_partial_page_length() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "s6.db");
    fs::write(&path, vec![0u8; 4095]).unwrap();

    pagedb()
        .arg(&path)
        .write_stdin(".exit\n")
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "Db file is not a whole number of pages. Corrupt file.",
        ));
}

#[test]
fn missing_database_argument_is_reported() {
    pagedb()
        .assert()
        .failure()
        .stdout(predicate::str::contains("Must supply a database filename."));
}

#[test]
fn prepare_errors_are_recoverable_and_loop_continues() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "errors.db");

    pagedb()
        .arg(&path)
        .write_stdin("insert alice -1 a@x\ninsert alice 1 a@x\nselect\n.exit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("ID must be positive."))
        .stdout(predicate::str::contains("(1, alice, a@x)"));
}

#[test]
fn unrecognized_meta_command_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir, "meta.db");

    pagedb()
        .arg(&path)
        .write_stdin(".frobnicate\n.exit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Unrecognized command '.frobnicate'"));
}
