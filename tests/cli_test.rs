use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

mod common;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("wallet-ledger"));
    cmd.arg("tests/fixtures/batch.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with("user,paid,free\n"))
        // 700 drained paid first, then free
        .stdout(predicate::str::contains("alice,0,100"))
        // 50 redeemed once, 20 consumed, paid payment failed
        .stdout(predicate::str::contains("bob,0,30"))
        .stderr(predicate::str::contains(
            "Error processing operation: user bob already redeemed code `WELCOME`",
        ))
        .stderr(predicate::str::contains(
            "Error processing operation: insufficient balance: requested 10, available 0",
        ));

    Ok(())
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("wallet-ledger"));
    cmd.arg("tests/fixtures/does_not_exist.csv");

    cmd.assert().failure();
}

#[test]
fn test_cli_many_users_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("generated.csv");
    common::generate_csv(&path, 1_000, 25).expect("Failed to generate CSV");

    let output = Command::new(cargo_bin!("wallet-ledger"))
        .arg(&path)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let rows: Vec<&str> = stdout.lines().skip(1).collect();
    assert_eq!(rows.len(), 25);
    assert_eq!(rows[0], "user000,40,0");
    assert_eq!(rows[24], "user024,40,0");
    let mut sorted = rows.clone();
    sorted.sort();
    assert_eq!(rows, sorted);
}
