#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const VALID_MANIFEST: &str = r#"
resources:
  - kind: launch_configuration
    name: cfg-1
    region: us-east-1
    image_id: ami-1
    instance_type: t2.micro
    security_groups: [web]
  - kind: vpc
    name: env-vpc
    region: sa-east-1
    cidr_block: 10.0.0.0/16
"#;

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("converge").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("--region"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("converge").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("converge"));
}

/// applyコマンドのヘルプに --dry-run が含まれることを確認
#[test]
fn test_apply_help() {
    let mut cmd = Command::cargo_bin("converge").unwrap();
    cmd.arg("apply")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--file"));
}

/// 未知のリソース種別は引数エラーになることを確認
#[test]
fn test_list_unknown_kind() {
    let mut cmd = Command::cargo_bin("converge").unwrap();
    cmd.arg("list")
        .arg("router")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown resource kind"));
}

#[test]
fn test_validate_valid_manifest() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("resources.yaml");
    fs::write(&path, VALID_MANIFEST).unwrap();

    let mut cmd = Command::cargo_bin("converge").unwrap();
    cmd.arg("validate")
        .arg("-f")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("cfg-1"))
        .stdout(predicate::str::contains("env-vpc"));
}

#[test]
fn test_validate_invalid_manifest() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("resources.yaml");
    fs::write(
        &path,
        "resources:\n  - kind: vpc\n    name: main\n    region: us-east-1\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("converge").unwrap();
    cmd.arg("validate")
        .arg("-f")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cidr_block"));
}

#[test]
fn test_plan_missing_manifest() {
    let temp_dir = tempfile::tempdir().unwrap();

    let mut cmd = Command::cargo_bin("converge").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("plan")
        .arg("-f")
        .arg("missing.yaml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.yaml"));
}

/// リージョン未設定ではAWSに接続する前にエラーになることを確認
#[test]
fn test_apply_without_regions() {
    let temp_dir = tempfile::tempdir().unwrap();
    let manifest = temp_dir.path().join("resources.yaml");
    fs::write(&manifest, VALID_MANIFEST).unwrap();
    let config = temp_dir.path().join("converge.yaml");
    fs::write(&config, "concurrency: 2\n").unwrap();

    let mut cmd = Command::cargo_bin("converge").unwrap();
    cmd.current_dir(temp_dir.path())
        .env("CONVERGE_CONFIG", &config)
        .env_remove("CONVERGE_REGIONS")
        .env_remove("AWS_REGION")
        .arg("apply")
        .arg("-f")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONVERGE_REGIONS"));
}
