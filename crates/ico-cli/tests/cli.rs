//! Black-box tests driving the compiled `ico` binary the way a user would.

use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

fn ico() -> Command {
    Command::cargo_bin("ico").unwrap()
}

fn script(source: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("main.ico");
    fs::write(&path, source).unwrap();
    (dir, path)
}

#[test]
fn running_a_script_prints_its_output_and_exits_zero() {
    let (_dir, path) = script("print 1 + 2;");
    ico()
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("3"));
}

#[test]
fn compile_error_exits_65_and_reports_on_stderr() {
    let (_dir, path) = script("var = ;");
    ico()
        .arg(&path)
        .assert()
        .code(65)
        .stderr(contains("error"))
        .stderr(contains("at 'var'"));
}

#[test]
fn compile_error_at_eof_reports_at_end() {
    let (_dir, path) = script("print 1 +");
    ico()
        .arg(&path)
        .assert()
        .code(65)
        .stderr(contains("at end"));
}

#[test]
fn runtime_error_exits_70_and_reports_on_stderr() {
    let (_dir, path) = script("print undefined_name;");
    ico()
        .arg(&path)
        .assert()
        .code(70)
        .stderr(contains("Undefined variable"));
}

#[test]
fn missing_file_exits_74() {
    ico()
        .arg("/no/such/file.ico")
        .assert()
        .code(74)
        .stderr(contains("can't read"));
}

#[test]
fn gc_stress_flag_does_not_change_program_output() {
    let (_dir, path) = script("var i = 0; while (i < 5) { print i; i = i + 1; }");
    let relaxed = ico().arg(&path).output().unwrap();
    let stressed = ico().arg("--gc-stress").arg(&path).output().unwrap();
    assert_eq!(relaxed.stdout, stressed.stdout);
}

#[test]
fn color_never_flag_suppresses_ansi_escapes() {
    let (_dir, path) = script("print undefined_name;");
    ico()
        .arg("--color")
        .arg("never")
        .arg(&path)
        .assert()
        .stderr(contains("\u{1b}[").not());
}
