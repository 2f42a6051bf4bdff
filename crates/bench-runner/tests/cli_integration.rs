//! Integration tests for the strmem-bench CLI.

use bench_core as _;
use chrono as _;
use clap as _;
use thiserror as _;
use tracing as _;
use tracing_subscriber as _;

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn strmem_bench(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_strmem-bench"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run strmem-bench")
}

#[test]
fn help_lists_options() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = strmem_bench(&["--help"], dir.path());
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    for flag in ["--emulator", "--sizes", "--configs", "--report-only", "--target-time"] {
        assert!(text.contains(flag), "help is missing {flag}");
    }
}

#[test]
fn emulator_is_required() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = strmem_bench(&[], dir.path());
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("--emulator"));
}

#[test]
fn report_only_indexes_existing_results() {
    let dir = tempfile::tempdir().expect("tempdir");
    let results = dir.path().join("results");
    fs::create_dir_all(&results).expect("results dir");
    fs::write(results.join("abc-memcpy-stdlib.csv"), "").expect("csv");
    fs::write(results.join("abc-memcpy-128-m1.csv"), "").expect("csv");

    let out = strmem_bench(
        &[
            "--emulator",
            "abc",
            "--benchmarks",
            "memcpy,memset",
            "--configs",
            "stdlib,128-1",
            "--results-dir",
            "results",
            "--report-only",
            "--datestamp",
            "stamp",
        ],
        dir.path(),
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("Found 2 of 4 result files"));
    assert!(text.contains("missing: abc-memset-stdlib"));
    assert!(text.contains("Complete benchmarks: memcpy"));
    assert!(dir.path().join("logs/rab-stamp.log").is_file());
}

#[test]
fn missing_emulator_install_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("src")).expect("source tree");

    let out = strmem_bench(
        &["--emulator", "abc", "--benchmarks", "memcpy", "--datestamp", "stamp"],
        dir.path(),
    );
    assert_eq!(out.status.code(), Some(1));
    let log = fs::read_to_string(dir.path().join("logs/rab-stamp.log")).expect("log file");
    assert!(log.contains("emulator binary"));
    assert!(log.contains("qemu-abc"));
}

#[test]
fn invalid_settings_fail_before_any_work() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = strmem_bench(
        &[
            "--emulator",
            "abc",
            "--sizes",
            "0",
            "--report-only",
            "--datestamp",
            "stamp",
        ],
        dir.path(),
    );
    assert_eq!(out.status.code(), Some(1));
}
