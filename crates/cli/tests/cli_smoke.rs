//! CLI smoke tests for wasmdev.
//!
//! These run the binary end to end for the paths that need no container
//! runtime: help/version, argument validation, and plan-only builds.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the wasmdev binary.
fn wasmdev_cmd() -> Command {
  cargo_bin_cmd!("wasmdev")
}

/// Create a temp directory holding a minimal buildable package.
fn temp_package(name: &str) -> TempDir {
  let temp = TempDir::new().unwrap();
  std::fs::write(
    temp.path().join("wasmdev.toml"),
    format!("[package]\nname = \"{name}\"\n"),
  )
  .unwrap();
  std::fs::write(
    temp.path().join("main.cc"),
    "extern \"C\" int apply() { return 0; }\n",
  )
  .unwrap();
  temp
}

#[test]
fn help_flag_works() {
  wasmdev_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  wasmdev_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("wasmdev"));
}

#[test]
fn build_help_lists_the_flag_surface() {
  wasmdev_cmd()
    .args(["build", "--help"])
    .assert()
    .success()
    .stdout(predicate::str::contains("--makefile"))
    .stdout(predicate::str::contains("--compile-commands"))
    .stdout(predicate::str::contains("--build-mode"));
}

#[test]
fn unknown_build_mode_is_rejected() {
  let temp = temp_package("main");
  wasmdev_cmd()
    .current_dir(temp.path())
    .args(["build", "--build-mode", "fastdebug"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown build mode"));
}

#[test]
fn unknown_compiler_environment_is_rejected() {
  let temp = temp_package("main");
  wasmdev_cmd()
    .current_dir(temp.path())
    .args(["build", "--compiler", "podman"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown compiler environment"));
}

#[test]
fn build_outside_a_package_fails_with_descriptor_hint() {
  let temp = TempDir::new().unwrap();
  let cache = TempDir::new().unwrap();
  wasmdev_cmd()
    .current_dir(temp.path())
    .env("WASMDEV_CACHE", cache.path())
    .args(["build", "--makefile"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("wasmdev.toml"));
}

#[test]
fn plan_only_build_prints_the_plan_without_docker() {
  let temp = temp_package("main");
  let cache = TempDir::new().unwrap();
  wasmdev_cmd()
    .current_dir(temp.path())
    .env("WASMDEV_CACHE", cache.path())
    .args(["build", "--makefile"])
    .assert()
    .success()
    .stdout(predicate::str::contains("CXXFLAGS :="))
    .stdout(predicate::str::contains("main.cc"));
}

#[test]
fn plan_only_debug_build_carries_debug_flags() {
  let temp = temp_package("main");
  let cache = TempDir::new().unwrap();
  wasmdev_cmd()
    .current_dir(temp.path())
    .env("WASMDEV_CACHE", cache.path())
    .args(["build", "--makefile", "--build-mode", "debug"])
    .assert()
    .success()
    .stdout(predicate::str::contains("-O0"));
}

#[test]
fn plan_only_leaves_no_transient_files_behind() {
  let temp = temp_package("main");
  let cache = TempDir::new().unwrap();
  wasmdev_cmd()
    .current_dir(temp.path())
    .env("WASMDEV_CACHE", cache.path())
    .args(["build", "--makefile"])
    .assert()
    .success();

  let leftovers: Vec<_> = std::fs::read_dir(temp.path())
    .unwrap()
    .filter_map(|e| e.ok())
    .map(|e| e.file_name().to_string_lossy().into_owned())
    .filter(|name| name.starts_with(".wasmdev-make"))
    .collect();
  assert!(leftovers.is_empty(), "leftover plan files: {leftovers:?}");
}
