use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn settle(from: &str, to: &str, result_dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(cargo_bin!());
    cmd.env_remove("DATABASE_URL")
        .arg("tests/fixtures/transactions.csv")
        .arg("--from")
        .arg(from)
        .arg("--to")
        .arg(to)
        .arg("--result-dir")
        .arg(result_dir);
    cmd
}

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    settle("2024-03-01", "2024-03-02", dir.path())
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "merchant_id,date,gross,fee,net,txn_count\n",
        ))
        .stdout(predicate::str::contains("m1,2024-03-01,150,3.75,146.25,2"))
        .stdout(predicate::str::contains("m2,2024-03-01,200,5,195,1"))
        // Last second of the `to` day is included
        .stdout(predicate::str::contains("m2,2024-03-02,20,0.5,19.5,1"))
        .stdout(predicate::str::contains("m3").not());

    // The artifact is left in the result directory
    let artifacts: Vec<_> = std::fs::read_dir(dir.path())?.collect();
    assert_eq!(artifacts.len(), 1);

    Ok(())
}

#[test]
fn test_cli_single_day() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    let output = settle("2024-03-03", "2024-03-03", dir.path()).output()?;
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout)?,
        "merchant_id,date,gross,fee,net,txn_count\nm3,2024-03-03,300,7.5,292.5,1\n"
    );

    Ok(())
}

#[test]
fn test_cli_inverted_range_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    settle("2024-03-02", "2024-03-01", dir.path())
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("CANCELLED"));

    Ok(())
}

#[test]
fn test_cli_malformed_date_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    settle("March 1st", "2024-03-01", dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid date"));

    Ok(())
}
