use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn volume_path(root: &std::path::Path) -> std::path::PathBuf {
    root.join("cache.vol")
}

#[test]
fn end_to_end_create_set_get_stat() {
    let tmp = tempfile::tempdir().unwrap();
    let vol = volume_path(tmp.path());

    Command::cargo_bin("ringvault")
        .unwrap()
        .args(["create", vol.to_str().unwrap(), "--size", "1048576", "--chunk-size", "4096"])
        .assert()
        .success();

    Command::cargo_bin("ringvault")
        .unwrap()
        .args(["set", vol.to_str().unwrap(), "--size", "1048576", "--chunk-size", "4096", "greeting", "hello"])
        .assert()
        .success();

    Command::cargo_bin("ringvault")
        .unwrap()
        .args(["get", vol.to_str().unwrap(), "--size", "1048576", "--chunk-size", "4096", "greeting"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));

    Command::cargo_bin("ringvault")
        .unwrap()
        .args(["stat", vol.to_str().unwrap(), "--size", "1048576", "--chunk-size", "4096"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"corrupted\": false"));
}

#[test]
fn get_of_missing_key_exits_non_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let vol = volume_path(tmp.path());

    Command::cargo_bin("ringvault")
        .unwrap()
        .args(["create", vol.to_str().unwrap(), "--size", "1048576", "--chunk-size", "4096"])
        .assert()
        .success();

    Command::cargo_bin("ringvault")
        .unwrap()
        .args(["get", vol.to_str().unwrap(), "--size", "1048576", "--chunk-size", "4096", "nope"])
        .assert()
        .failure();
}

#[test]
fn set_persists_across_separate_cli_invocations() {
    let tmp = tempfile::tempdir().unwrap();
    let vol = volume_path(tmp.path());

    Command::cargo_bin("ringvault")
        .unwrap()
        .args(["set", vol.to_str().unwrap(), "--size", "1048576", "--chunk-size", "4096", "k1", "v1"])
        .assert()
        .success();

    Command::cargo_bin("ringvault")
        .unwrap()
        .args(["set", vol.to_str().unwrap(), "--size", "1048576", "--chunk-size", "4096", "k2", "v2"])
        .assert()
        .success();

    Command::cargo_bin("ringvault")
        .unwrap()
        .args(["get", vol.to_str().unwrap(), "--size", "1048576", "--chunk-size", "4096", "k1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("v1"));

    Command::cargo_bin("ringvault")
        .unwrap()
        .args(["get", vol.to_str().unwrap(), "--size", "1048576", "--chunk-size", "4096", "k2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("v2"));
}
