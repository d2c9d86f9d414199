use assert_cmd::Command;
use predicates::prelude::*;

/// Top-level help lists every subcommand.
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("flintrock").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("launch"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("describe"))
        .stdout(predicate::str::contains("add-slaves"))
        .stdout(predicate::str::contains("remove-slaves"))
        .stdout(predicate::str::contains("run-command"))
        .stdout(predicate::str::contains("copy-file"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("flintrock").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("flintrock"));
}

/// Launch help shows the provider options.
#[test]
fn test_launch_help() {
    let mut cmd = Command::cargo_bin("flintrock").unwrap();
    cmd.arg("launch")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--num-slaves"))
        .stdout(predicate::str::contains("--spark-version"))
        .stdout(predicate::str::contains("--install-hdfs"))
        .stdout(predicate::str::contains("--spot-price"))
        .stdout(predicate::str::contains("--assume-yes"))
        .stdout(predicate::str::contains("AWS_DEFAULT_REGION"));
}

/// Bad usage exits with code 2.
#[test]
fn test_missing_required_arguments_exit_code_2() {
    let mut cmd = Command::cargo_bin("flintrock").unwrap();
    cmd.arg("launch")
        .env_remove("AWS_DEFAULT_REGION")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_unknown_subcommand_exit_code_2() {
    let mut cmd = Command::cargo_bin("flintrock").unwrap();
    cmd.arg("frobnicate").assert().failure().code(2);
}

/// `--spark-git-commit` cannot be used without its repository.
#[test]
fn test_git_commit_requires_repository() {
    let mut cmd = Command::cargo_bin("flintrock").unwrap();
    cmd.args([
        "launch",
        "demo",
        "--region",
        "us-east-1",
        "--identity-file",
        "/tmp/key.pem",
        "--key-name",
        "k",
        "--ami",
        "ami-123",
        "--spark-git-commit",
        "latest",
    ])
    .assert()
    .failure()
    .code(2)
    .stderr(predicate::str::contains("--spark-git-repository"));
}

/// `run-command` requires a command after the cluster name.
#[test]
fn test_run_command_requires_command() {
    let mut cmd = Command::cargo_bin("flintrock").unwrap();
    cmd.args([
        "run-command",
        "demo",
        "--region",
        "us-east-1",
        "--identity-file",
        "/tmp/key.pem",
    ])
    .assert()
    .failure()
    .code(2);
}
